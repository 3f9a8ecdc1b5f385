//! Game store: the persisted collection of games and the current-game pointer.
//!
//! Every mutation is computed on a copy of the aggregate, swapped in, written
//! to the durable slot and then published to subscribers, in that order.
//! Operations that reference an unknown game, batch or phrase leave the
//! aggregate untouched and neither persist nor publish.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    models::{Game, PhraseBatch, Settings},
    storage::{KeyValueStore, SETTINGS_KEY},
};

type Callback = dyn Fn(&Settings) + Send + Sync;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Arc<Callback>)>,
}

/// Handle returned by [`GameStore::subscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Stop delivery to the associated callback. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("next_id", &self.next_id)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Owner of the [`Settings`] aggregate and its durable mirror.
pub struct GameStore {
    settings: Settings,
    storage: Arc<dyn KeyValueStore>,
    key: String,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl GameStore {
    /// Open the store, loading whatever the slot holds under [`SETTINGS_KEY`].
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::open_with_key(storage, SETTINGS_KEY)
    }

    /// Open the store against a custom slot key.
    pub fn open_with_key(storage: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let settings = load_settings(storage.as_ref(), &key);
        Self {
            settings,
            storage,
            key,
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    /// Current aggregate.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Owned copy of the current aggregate.
    pub fn snapshot(&self) -> Settings {
        self.settings.clone()
    }

    /// Register `callback`; it receives the current value now and every later mutation.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        let callback: Arc<Callback> = Arc::new(callback);
        let id = {
            let mut subscribers = self.subscribers.lock();
            subscribers.next_id += 1;
            let id = subscribers.next_id;
            subscribers.entries.push((id, Arc::clone(&callback)));
            id
        };
        callback(&self.settings);
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Append a new game and make it current. A blank name becomes `Game N`.
    pub fn create_game(&mut self, name: &str) -> String {
        let trimmed = name.trim();
        let name = if trimmed.is_empty() {
            format!("Game {}", self.settings.games.len() + 1)
        } else {
            trimmed.to_string()
        };
        let game = Game::new(name);
        let game_id = game.id.clone();
        self.apply("create_game", |settings| {
            settings.current_game_id = Some(game.id.clone());
            settings.games.push(game);
            true
        });
        game_id
    }

    /// Prepend `batch` to the game's history. Batch ids are unique across the store.
    pub fn add_batch_to_game(&mut self, game_id: &str, batch: PhraseBatch) -> bool {
        self.apply("add_batch_to_game", |settings| {
            if settings.games.iter().any(|game| game.batch(&batch.id).is_some()) {
                error!(game_id, batch_id = %batch.id, "cannot add batch: id already stored");
                return false;
            }
            match settings.game_mut(game_id) {
                Some(game) => {
                    game.batches.insert(0, batch);
                    true
                }
                None => {
                    error!(game_id, "cannot add batch: game not found");
                    false
                }
            }
        })
    }

    /// Remove one batch from a game.
    pub fn remove_batch(&mut self, game_id: &str, batch_id: &str) -> bool {
        self.apply("remove_batch", |settings| {
            let Some(game) = settings.game_mut(game_id) else {
                debug!(game_id, "remove_batch ignored: game not found");
                return false;
            };
            let before = game.batches.len();
            game.batches.retain(|batch| batch.id != batch_id);
            game.batches.len() != before
        })
    }

    /// Remove a game; the current pointer falls back to the first remaining game.
    pub fn remove_game(&mut self, game_id: &str) -> bool {
        self.apply("remove_game", |settings| {
            let before = settings.games.len();
            settings.games.retain(|game| game.id != game_id);
            if settings.games.len() == before {
                debug!(game_id, "remove_game ignored: game not found");
                return false;
            }
            if settings.current_game_id.as_deref() == Some(game_id) {
                settings.current_game_id = settings.games.first().map(|game| game.id.clone());
            }
            true
        })
    }

    /// Point at an existing game. Unknown ids are ignored.
    pub fn set_current_game(&mut self, game_id: &str) -> bool {
        self.apply("set_current_game", |settings| {
            if settings.game(game_id).is_none() {
                debug!(game_id, "set_current_game ignored: game not found");
                return false;
            }
            settings.current_game_id = Some(game_id.to_string());
            true
        })
    }

    /// Flip a game's collapsed display flag.
    pub fn toggle_game_collapsed(&mut self, game_id: &str) -> bool {
        self.apply("toggle_game_collapsed", |settings| {
            match settings.game_mut(game_id) {
                Some(game) => {
                    game.is_collapsed = !game.is_collapsed;
                    true
                }
                None => false,
            }
        })
    }

    /// Overwrite a game's name, trimmed like [`GameStore::create_game`].
    /// Callers validate emptiness.
    pub fn rename_game(&mut self, game_id: &str, name: &str) -> bool {
        self.apply("rename_game", |settings| match settings.game_mut(game_id) {
            Some(game) => {
                game.name = name.trim().to_string();
                true
            }
            None => false,
        })
    }

    /// Flip the `used` flag of the phrase at `index` in the given batch.
    pub fn toggle_phrase_used(&mut self, game_id: &str, batch_id: &str, index: usize) -> bool {
        self.apply("toggle_phrase_used", |settings| {
            let phrase = settings
                .game_mut(game_id)
                .and_then(|game| game.batch_mut(batch_id))
                .and_then(|batch| batch.phrases.get_mut(index));
            match phrase {
                Some(phrase) => {
                    phrase.used = !phrase.used;
                    true
                }
                None => {
                    debug!(game_id, batch_id, index, "toggle_phrase_used ignored");
                    false
                }
            }
        })
    }

    /// Id of the current game, selecting the first game or creating one when needed.
    pub fn ensure_current_game(&mut self) -> String {
        if let Some(game) = self.settings.current_game() {
            return game.id.clone();
        }
        if let Some(first) = self.settings.games.first().map(|game| game.id.clone()) {
            self.set_current_game(&first);
            return first;
        }
        self.create_game("")
    }

    /// Restore the empty default and persist it.
    pub fn reset(&mut self) {
        self.apply("reset", |settings| {
            *settings = Settings::default();
            true
        });
    }

    fn apply<F>(&mut self, op: &'static str, mutate: F) -> bool
    where
        F: FnOnce(&mut Settings) -> bool,
    {
        let mut next = self.settings.clone();
        if !mutate(&mut next) {
            return false;
        }
        self.settings = next;
        debug!(op, games = self.settings.games.len(), "store updated");
        self.persist();
        self.publish();
        true
    }

    fn persist(&self) {
        let serialized = match serde_json::to_string(&self.settings) {
            Ok(serialized) => serialized,
            Err(err) => {
                error!(?err, "failed to serialize settings");
                return;
            }
        };
        if let Err(err) = self.storage.write(&self.key, &serialized) {
            error!(?err, key = %self.key, "failed to persist settings");
        }
    }

    fn publish(&self) {
        let callbacks: Vec<Arc<Callback>> = self
            .subscribers
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(&self.settings);
        }
    }
}

impl std::fmt::Debug for GameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameStore")
            .field("settings", &self.settings)
            .field("key", &self.key)
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

fn load_settings(storage: &dyn KeyValueStore, key: &str) -> Settings {
    let raw = match storage.read(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!(key, "no persisted settings; starting empty");
            return Settings::default();
        }
        Err(err) => {
            warn!(?err, key, "failed to read persisted settings; starting empty");
            return Settings::default();
        }
    };

    let mut settings: Settings = match serde_json::from_str(&raw) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(%err, key, "persisted settings unreadable; starting empty");
            return Settings::default();
        }
    };

    let dangling = settings
        .current_game_id
        .as_deref()
        .map(|game_id| settings.game(game_id).is_none())
        .unwrap_or(false);
    if dangling {
        warn!(
            current = settings.current_game_id.as_deref().unwrap_or_default(),
            "persisted current game missing; repointing"
        );
        settings.current_game_id = settings.games.first().map(|game| game.id.clone());
    }
    settings
}
