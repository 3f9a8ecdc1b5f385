//! Shared domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single conversational phrase the player tries to slip into conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    /// Phrase text shown to the player.
    pub text: String,
    /// Point value, conventionally 1, 2 or 3 by position in the batch.
    pub points: u8,
    /// Whether the player has managed to use the phrase.
    #[serde(default)]
    pub used: bool,
}

impl Phrase {
    /// Build an unused phrase.
    pub fn new(text: impl Into<String>, points: u8) -> Self {
        Self {
            text: text.into(),
            points,
            used: false,
        }
    }
}

/// One generation event: a timestamped set of phrases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseBatch {
    /// Unique batch identifier.
    pub id: String,
    /// Moment the batch was dealt.
    pub timestamp: DateTime<Utc>,
    /// Phrases in deal order.
    pub phrases: Vec<Phrase>,
}

impl PhraseBatch {
    /// Wrap phrases in a batch with a fresh id, stamped now.
    pub fn new(phrases: Vec<Phrase>) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            phrases,
        }
    }

    /// Points earned from used phrases in this batch.
    pub fn score(&self) -> u32 {
        self.phrases
            .iter()
            .filter(|phrase| phrase.used)
            .map(|phrase| u32::from(phrase.points))
            .sum()
    }
}

/// A named game holding its batches, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    /// Unique game identifier.
    pub id: String,
    /// User-editable display name; not required to be unique.
    pub name: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Batches, most recently added first.
    #[serde(default)]
    pub batches: Vec<PhraseBatch>,
    /// Display hint for frontends.
    #[serde(default)]
    pub is_collapsed: bool,
}

impl Game {
    /// Create an empty, expanded game stamped now.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            timestamp: Utc::now(),
            batches: Vec::new(),
            is_collapsed: false,
        }
    }

    /// Timestamp of the newest batch, or the creation time when there is none.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.batches
            .first()
            .map(|batch| batch.timestamp)
            .unwrap_or(self.timestamp)
    }

    /// Total points from used phrases across all batches.
    pub fn score(&self) -> u32 {
        self.batches.iter().map(PhraseBatch::score).sum()
    }

    /// Look up a batch by id.
    pub fn batch(&self, batch_id: &str) -> Option<&PhraseBatch> {
        self.batches.iter().find(|batch| batch.id == batch_id)
    }

    pub(crate) fn batch_mut(&mut self, batch_id: &str) -> Option<&mut PhraseBatch> {
        self.batches.iter_mut().find(|batch| batch.id == batch_id)
    }
}

/// Root aggregate persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Games in insertion order.
    pub games: Vec<Game>,
    /// Id of the game new batches attach to.
    #[serde(default)]
    pub current_game_id: Option<String>,
}

impl Settings {
    /// Look up a game by id.
    pub fn game(&self, game_id: &str) -> Option<&Game> {
        self.games.iter().find(|game| game.id == game_id)
    }

    pub(crate) fn game_mut(&mut self, game_id: &str) -> Option<&mut Game> {
        self.games.iter_mut().find(|game| game.id == game_id)
    }

    /// The game referenced by `current_game_id`, if it exists.
    pub fn current_game(&self) -> Option<&Game> {
        self.current_game_id
            .as_deref()
            .and_then(|game_id| self.game(game_id))
    }

    /// Games ordered by most recent activity, ties keeping insertion order.
    pub fn games_by_recency(&self) -> Vec<&Game> {
        games_by_recency(&self.games)
    }
}

/// Stable sort of `games` descending by [`Game::last_activity`].
pub fn games_by_recency(games: &[Game]) -> Vec<&Game> {
    let mut sorted: Vec<&Game> = games.iter().collect();
    sorted.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
    sorted
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
