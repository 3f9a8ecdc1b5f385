//! Turning a generation cycle into a batch on the current game.

use tracing::info;

use crate::{
    generator::{generate_with_fallback, Generation, PhraseSource, RetryPolicy},
    models::{Phrase, PhraseBatch},
    store::GameStore,
};

/// Where a dealt batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealOrigin {
    /// Written by the generator.
    Generated,
    /// Substituted from the built-in phrases.
    Fallback,
}

/// A batch ready to be attached to a game.
#[derive(Debug, Clone)]
pub struct Deal {
    /// The freshly built batch.
    pub batch: PhraseBatch,
    /// Whether the generator or the fallback produced it.
    pub origin: DealOrigin,
    /// Message worth showing the player.
    pub notice: Option<String>,
}

impl Deal {
    /// Build a deal from a finished generation cycle.
    pub fn from_generation(generation: Generation) -> Self {
        let origin = if generation.is_fallback() {
            DealOrigin::Fallback
        } else {
            DealOrigin::Generated
        };
        let notice = generation.notice();
        let phrases = generation.phrases.into_iter().map(Phrase::from).collect();
        Self {
            batch: PhraseBatch::new(phrases),
            origin,
            notice,
        }
    }

    /// Attach the batch to the current game, creating one if needed. Returns the game id.
    pub fn attach(self, store: &mut GameStore) -> String {
        let game_id = store.ensure_current_game();
        info!(
            game_id = %game_id,
            batch_id = %self.batch.id,
            origin = ?self.origin,
            "dealing batch"
        );
        store.add_batch_to_game(&game_id, self.batch);
        game_id
    }
}

/// Run one generation cycle and package the result as a [`Deal`].
pub async fn deal(source: &dyn PhraseSource, policy: RetryPolicy) -> Deal {
    Deal::from_generation(generate_with_fallback(source, policy).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        generator::{GenerateError, GeneratedPhrase, FALLBACK_PHRASES},
        storage::MemoryStore,
    };
    use async_trait::async_trait;
    use std::{sync::Arc, time::Duration};

    struct Fixed(Result<Vec<GeneratedPhrase>, u16>);

    #[async_trait]
    impl PhraseSource for Fixed {
        async fn fetch(&self) -> Result<Vec<GeneratedPhrase>, GenerateError> {
            self.0.clone().map_err(GenerateError::Status)
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn phrases() -> Vec<GeneratedPhrase> {
        ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(index, text)| GeneratedPhrase {
                text: text.to_string(),
                points: index as u8 + 1,
            })
            .collect()
    }

    #[tokio::test]
    async fn generated_deal_attaches_to_implicit_game() {
        let mut store = GameStore::open(Arc::new(MemoryStore::new()));
        let dealt = deal(&Fixed(Ok(phrases())), policy()).await;
        assert_eq!(dealt.origin, DealOrigin::Generated);
        assert_eq!(dealt.notice, None);
        assert!(dealt.batch.phrases.iter().all(|phrase| !phrase.used));

        let batch_id = dealt.batch.id.clone();
        let game_id = dealt.attach(&mut store);
        let settings = store.settings();
        assert_eq!(settings.games.len(), 1);
        assert_eq!(settings.current_game_id.as_deref(), Some(game_id.as_str()));
        assert_eq!(settings.games[0].batches[0].id, batch_id);
    }

    #[tokio::test]
    async fn failed_deal_uses_fallback_on_current_game() {
        let mut store = GameStore::open(Arc::new(MemoryStore::new()));
        let first = store.create_game("First");
        let second = store.create_game("Second");
        store.set_current_game(&first);

        let dealt = deal(&Fixed(Err(500)), policy()).await;
        assert_eq!(dealt.origin, DealOrigin::Fallback);
        assert!(dealt.notice.is_some());
        let texts: Vec<_> = dealt.batch.phrases.iter().map(|p| p.text.clone()).collect();
        assert_eq!(texts, FALLBACK_PHRASES);

        assert_eq!(dealt.attach(&mut store), first);
        assert_eq!(store.settings().game(&first).map(|g| g.batches.len()), Some(1));
        assert_eq!(store.settings().game(&second).map(|g| g.batches.len()), Some(0));
    }

    #[tokio::test]
    async fn consecutive_deals_stack_newest_first() {
        let mut store = GameStore::open(Arc::new(MemoryStore::new()));
        let older = deal(&Fixed(Ok(phrases())), policy()).await;
        let newer = deal(&Fixed(Ok(phrases())), policy()).await;
        let older_id = older.batch.id.clone();
        let newer_id = newer.batch.id.clone();
        assert_ne!(older_id, newer_id);

        older.attach(&mut store);
        newer.attach(&mut store);
        let ids: Vec<_> = store.settings().games[0]
            .batches
            .iter()
            .map(|batch| batch.id.clone())
            .collect();
        assert_eq!(ids, [newer_id, older_id]);
    }
}
