//! Application configuration.
//!
//! Values are layered: built-in defaults, then `config.toml` under the user's
//! config directory, then `SLIPTALK__*` environment variables.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::storage::FileStore;

/// Directory under `~/.config` holding the configuration file.
pub const CONFIG_DIR: &str = "sliptalk";

const CONFIG_FILE: &str = "config.toml";
const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_CONFIG: &str = r#"# SlipTalk configuration

# Base URL of the generative-language API.
api_url = "https://generativelanguage.googleapis.com/v1beta"

# Model used to write phrases.
model = "gemini-1.5-flash"

# API key; GEMINI_API_KEY is used when this is left unset.
# api_key = ""

# Per-request timeout in seconds.
request_timeout_secs = 15

# Attempts before falling back to the built-in phrases.
max_attempts = 2

# Pause between attempts in milliseconds.
retry_backoff_ms = 750

# Where games are stored; defaults to the platform data directory.
# data_dir = "/path/to/sliptalk"
"#;

/// Runtime settings for the phrase generator and storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the generative-language API.
    pub api_url: String,
    /// Model name inserted into the request path.
    pub model: String,
    /// API key sent with each request.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Number of generation attempts before falling back.
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds.
    pub retry_backoff_ms: u64,
    /// Directory holding the persisted settings slot.
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            request_timeout_secs: 15,
            max_attempts: 2,
            retry_backoff_ms: 750,
            data_dir: FileStore::default_root(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location and the environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        if config.api_key.is_none() {
            config.api_key = std::env::var(API_KEY_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty());
        }
        Ok(config)
    }

    /// Load configuration from `path` (optional) layered over the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("api_url", defaults.api_url.clone())?
            .set_default("model", defaults.model.clone())?
            .set_default("request_timeout_secs", defaults.request_timeout_secs as i64)?
            .set_default("max_attempts", i64::from(defaults.max_attempts))?
            .set_default("retry_backoff_ms", defaults.retry_backoff_ms as i64)?
            .set_default("data_dir", defaults.data_dir.to_string_lossy().to_string())?
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("SLIPTALK").separator("__"))
            .build()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        let mut config: AppConfig = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        config.api_key = config
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        config.max_attempts = config.max_attempts.max(1);
        Ok(config)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Backoff between attempts as a [`Duration`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Location of the configuration file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// Write a commented default configuration if none exists yet.
pub fn ensure_default_config() -> Result<()> {
    write_default_config(&config_path())
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = AppConfig::load_from(&dir.path().join("absent.toml"))?;
        let defaults = AppConfig::default();
        assert_eq!(config.api_url, defaults.api_url);
        assert_eq!(config.model, defaults.model);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.api_key, None);
        Ok(())
    }

    #[test]
    fn written_default_config_parses_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join(CONFIG_FILE);
        write_default_config(&path)?;
        assert!(path.exists());

        let config = AppConfig::load_from(&path)?;
        assert_eq!(config.model, "gemini-1.5-flash");
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.retry_backoff(), Duration::from_millis(750));
        Ok(())
    }

    #[test]
    fn file_values_override_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "model = \"test-model\"\napi_key = \"  secret \"\nmax_attempts = 0\ndata_dir = \"/tmp/slips\"\n",
        )?;

        let config = AppConfig::load_from(&path)?;
        assert_eq!(config.model, "test-model");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/slips"));
        Ok(())
    }

    #[test]
    fn existing_config_is_not_overwritten() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "model = \"mine\"\n")?;
        write_default_config(&path)?;
        assert_eq!(fs::read_to_string(&path)?, "model = \"mine\"\n");
        Ok(())
    }
}
