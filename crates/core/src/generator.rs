//! Phrase generation against a generative-language API, with retry and fallback.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{config::AppConfig, models::Phrase};

/// Number of phrases dealt per batch.
pub const PHRASES_PER_BATCH: usize = 3;

/// Phrases substituted when generation fails.
pub const FALLBACK_PHRASES: [&str; PHRASES_PER_BATCH] = [
    "I had the strangest dream last night",
    "That reminds me of something my grandmother used to say",
    "Honestly, I think pineapple belongs on pizza",
];

const API_KEY_HEADER: &str = "x-goog-api-key";

const PROMPT: &str = "Write three short, funny phrases a party guest could try to \
slip naturally into conversation without anyone noticing. The first should be easy, \
the second harder, the third outrageous. Respond with only a JSON array of objects \
with the fields \"text\" (string) and \"points\" (1, 2 or 3).";

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid fence regex"));

/// A phrase as returned by the generator, before it joins a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPhrase {
    /// Phrase text.
    pub text: String,
    /// Point value, normalised to the phrase's position.
    pub points: u8,
}

impl From<GeneratedPhrase> for Phrase {
    fn from(value: GeneratedPhrase) -> Self {
        Phrase::new(value.text, value.points)
    }
}

/// Ways a generation request can fail.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The API asked us to back off.
    #[error("rate limited{}", retry_hint(.retry_after))]
    RateLimited {
        /// Server-provided wait before the next request, when sent.
        retry_after: Option<Duration>,
    },
    /// Non-success HTTP status other than rate limiting.
    #[error("generation API returned status {0}")]
    Status(u16),
    /// The request did not complete in time.
    #[error("generation request timed out")]
    Timeout,
    /// The response body did not hold three usable phrases.
    #[error("malformed generation response: {0}")]
    Malformed(String),
    /// Connection or protocol failure.
    #[error("generation request failed: {0}")]
    Transport(String),
    /// No API key is configured.
    #[error("no API key configured")]
    MissingApiKey,
}

impl GenerateError {
    /// Whether a further attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::RateLimited { .. } | Self::MissingApiKey)
    }
}

impl From<reqwest::Error> for GenerateError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!("; retry after {}s", wait.as_secs()),
        None => String::new(),
    }
}

/// Anything that can produce a fresh set of phrases.
#[async_trait]
pub trait PhraseSource: Send + Sync {
    /// Request one batch worth of phrases.
    async fn fetch(&self) -> Result<Vec<GeneratedPhrase>, GenerateError>;
}

/// Client for the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiSource {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiSource {
    /// Build a client from application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, GenerateError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_url, self.model)
    }
}

#[async_trait]
impl PhraseSource for GeminiSource {
    async fn fetch(&self) -> Result<Vec<GeneratedPhrase>, GenerateError> {
        let api_key = self.api_key.as_deref().ok_or(GenerateError::MissingApiKey)?;
        let body = json!({
            "contents": [{ "parts": [{ "text": PROMPT }] }],
            "generationConfig": { "temperature": 1.0 }
        });

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(GenerateError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(GenerateError::Status(status.as_u16()));
        }

        let payload: Value = response.json().await?;
        let text = candidate_text(&payload)
            .ok_or_else(|| GenerateError::Malformed("response carried no text".to_string()))?;
        parse_phrases(text)
    }
}

fn candidate_text(payload: &Value) -> Option<&str> {
    payload
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
}

#[derive(Debug, Deserialize)]
struct RawPhrase {
    text: String,
}

/// Parse model output into exactly [`PHRASES_PER_BATCH`] phrases.
///
/// Accepts a bare JSON array or one wrapped in a fenced code block. Extra
/// entries are dropped and points are reassigned 1, 2, 3 by position.
pub fn parse_phrases(text: &str) -> Result<Vec<GeneratedPhrase>, GenerateError> {
    let body = FENCED_BLOCK
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str())
        .unwrap_or(text)
        .trim();

    let raw: Vec<RawPhrase> =
        serde_json::from_str(body).map_err(|err| GenerateError::Malformed(err.to_string()))?;
    let phrases: Vec<GeneratedPhrase> = raw
        .into_iter()
        .map(|phrase| phrase.text.trim().to_string())
        .filter(|text| !text.is_empty())
        .take(PHRASES_PER_BATCH)
        .enumerate()
        .map(|(index, text)| GeneratedPhrase {
            text,
            points: (index + 1) as u8,
        })
        .collect();

    if phrases.len() < PHRASES_PER_BATCH {
        return Err(GenerateError::Malformed(format!(
            "expected {PHRASES_PER_BATCH} phrases, got {}",
            phrases.len()
        )));
    }
    Ok(phrases)
}

/// The built-in phrases with points 1, 2, 3.
pub fn fallback_phrases() -> Vec<GeneratedPhrase> {
    FALLBACK_PHRASES
        .iter()
        .enumerate()
        .map(|(index, text)| GeneratedPhrase {
            text: (*text).to_string(),
            points: (index + 1) as u8,
        })
        .collect()
}

/// How many times to ask and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Policy described by the application configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(750),
        }
    }
}

/// Result of a generation cycle; never a failure.
#[derive(Debug)]
pub struct Generation {
    /// Phrases to deal.
    pub phrases: Vec<GeneratedPhrase>,
    /// The last error when the fallback phrases were substituted.
    pub error: Option<GenerateError>,
}

impl Generation {
    /// Whether the phrases are the built-in fallback.
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }

    /// Informational message for the player, if any.
    pub fn notice(&self) -> Option<String> {
        match self.error.as_ref()? {
            GenerateError::RateLimited {
                retry_after: Some(wait),
            } => Some(format!(
                "Too many requests; try again in {}s. Using backup phrases.",
                wait.as_secs()
            )),
            GenerateError::RateLimited { retry_after: None } => {
                Some("Too many requests; try again shortly. Using backup phrases.".to_string())
            }
            GenerateError::MissingApiKey => {
                Some("No API key configured; using backup phrases.".to_string())
            }
            _ => Some("Couldn't reach the phrase generator; using backup phrases.".to_string()),
        }
    }
}

/// Ask `source` for phrases, retrying per `policy`, and fall back on failure.
pub async fn generate_with_fallback(source: &dyn PhraseSource, policy: RetryPolicy) -> Generation {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match source.fetch().await {
            Ok(phrases) => {
                debug!(attempt, "phrases generated");
                return Generation {
                    phrases,
                    error: None,
                };
            }
            Err(err) => {
                warn!(attempt, attempts, %err, "phrase generation failed");
                let retryable = err.is_retryable();
                last_error = Some(err);
                if !retryable {
                    break;
                }
                if attempt < attempts && !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    info!("substituting fallback phrases");
    Generation {
        phrases: fallback_phrases(),
        error: last_error,
    }
}
