#![warn(clippy::all, missing_docs)]

//! Core domain logic for SlipTalk.
//!
//! This crate hosts the game/batch/phrase models, the persisted game store,
//! the durable storage slots behind it, and the phrase generator used by the
//! terminal UI and any future frontends.

pub mod config;
pub mod dealer;
pub mod generator;
pub mod models;
pub mod storage;
pub mod store;

pub use config::AppConfig;
pub use dealer::{deal, Deal, DealOrigin};
pub use generator::{GeminiSource, GenerateError, PhraseSource, RetryPolicy};
pub use models::{Game, Phrase, PhraseBatch, Settings};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use store::{GameStore, Subscription};
