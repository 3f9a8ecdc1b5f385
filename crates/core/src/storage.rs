//! Durable key-value slots backing the game store.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tempfile::NamedTempFile;

/// Directory under the user's data dir used for persisted state.
pub const DEFAULT_DATA_DIR: &str = "sliptalk";

/// Key holding the serialized settings aggregate.
pub const SETTINGS_KEY: &str = "sliptalk.settings";

/// A set of named text slots, each read and overwritten wholesale.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, or `None` when the slot is empty.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Clear the slot. Removing an empty slot is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Slots stored as one JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at the provided directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location under the user's data directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_DATA_DIR)
    }

    /// Directory holding the slot files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(content))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let path = self.path_for(key);
        let mut staged = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("failed to stage write in {}", self.root.display()))?;
        staged
            .write_all(value.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        staged
            .persist(&path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}

/// In-process slots; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with `key` pre-populated, as if written by an earlier run.
    pub fn with_slot(key: &str, value: impl Into<String>) -> Self {
        let store = Self::default();
        store.slots.lock().insert(key.to_string(), value.into());
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.slots.lock().remove(key);
        Ok(())
    }
}

fn sanitize_key(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            result.push(ch);
        }
    }
    let trimmed = result.trim_matches('.');
    if trimmed.is_empty() {
        "slot".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path().join("state"));

        assert_eq!(store.read(SETTINGS_KEY)?, None);
        store.write(SETTINGS_KEY, r#"{"games":[]}"#)?;
        assert!(store.path_for(SETTINGS_KEY).exists());

        let reopened = FileStore::new(dir.path().join("state"));
        assert_eq!(
            reopened.read(SETTINGS_KEY)?.as_deref(),
            Some(r#"{"games":[]}"#)
        );

        reopened.write(SETTINGS_KEY, "{}")?;
        assert_eq!(store.read(SETTINGS_KEY)?.as_deref(), Some("{}"));

        store.remove(SETTINGS_KEY)?;
        store.remove(SETTINGS_KEY)?;
        assert_eq!(store.read(SETTINGS_KEY)?, None);
        Ok(())
    }

    #[test]
    fn memory_store_slots_are_independent() -> Result<()> {
        let store = MemoryStore::with_slot("a", "1");
        store.write("b", "2")?;
        assert_eq!(store.read("a")?.as_deref(), Some("1"));
        assert_eq!(store.read("b")?.as_deref(), Some("2"));
        store.remove("a")?;
        assert_eq!(store.read("a")?, None);
        Ok(())
    }

    #[test]
    fn sanitize_creates_safe_filenames() {
        assert_eq!(sanitize_key("sliptalk.settings"), "sliptalk.settings");
        assert_eq!(sanitize_key("../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_key("..."), "slot");
    }
}
