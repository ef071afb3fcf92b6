//! Configuration surface consumed by the retrieval core.
//!
//! Settings come from a JSON file with every field optional; an absent or
//! unreadable file silently falls back to the documented defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::limiter::RateLimiter;

pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 5.0;
pub const DEFAULT_BURST_SIZE: u32 = 10;
pub const DEFAULT_WORKER_ADDR: &str = "127.0.0.1:4690";

/// Rate-limit knobs for one external-resource class.
///
/// Both fields are optional: an absent rate means 5 req/s with burst 10;
/// a rate without a burst gets a burst of twice the rate.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateSettings {
    pub requests_per_second: Option<f64>,
    pub burst_size: Option<u32>,
}

impl RateSettings {
    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
            .filter(|rate| *rate > 0.0)
            .unwrap_or(DEFAULT_REQUESTS_PER_SECOND)
    }

    pub fn burst_size(&self) -> u32 {
        match (self.burst_size, self.requests_per_second) {
            (Some(burst), _) if burst > 0 => burst,
            (_, Some(rate)) if rate > 0.0 => (rate * 2.0).ceil() as u32,
            _ => DEFAULT_BURST_SIZE,
        }
    }

    pub fn build_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.requests_per_second(), self.burst_size())
    }
}

/// Which producer backs the embedding client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    /// Model pipeline loaded in this process.
    #[default]
    Local,
    /// Long-lived worker process reached over the wire protocol.
    Worker,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Storage location override. Defaults to `~/.recall`.
    pub data_dir: Option<PathBuf>,
    /// Disable embedding generation entirely; retrieval degrades to
    /// keyword-only.
    pub disable_embeddings: bool,
    pub embedding_producer: ProducerKind,
    /// Worker endpoint (`host:port`) for the worker producer.
    pub worker_addr: Option<String>,
    /// Rate limits for embedding calls.
    pub embedding: RateSettings,
    /// Rate limits for LLM (query-normalization) calls. Independent of
    /// the embedding limits; the two never share capacity.
    pub llm: RateSettings,
}

impl Settings {
    /// Load from `<data dir>/settings.json`.
    pub fn load() -> Self {
        Self::load_from(default_data_dir().join("settings.json"))
    }

    /// Load from an explicit path. Missing or unparseable files fall back
    /// to defaults; configuration absence is never an error.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unreadable settings, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Self::default()
            }
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("observations.db")
    }

    pub fn worker_addr(&self) -> &str {
        self.worker_addr.as_deref().unwrap_or(DEFAULT_WORKER_ADDR)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".recall")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_defaults() {
        let settings = RateSettings::default();
        assert_eq!(settings.requests_per_second(), 5.0);
        assert_eq!(settings.burst_size(), 10);
    }

    #[test]
    fn burst_defaults_to_twice_the_rate() {
        let settings = RateSettings {
            requests_per_second: Some(3.0),
            burst_size: None,
        };
        assert_eq!(settings.burst_size(), 6);

        let fractional = RateSettings {
            requests_per_second: Some(2.5),
            burst_size: None,
        };
        assert_eq!(fractional.burst_size(), 5);
    }

    #[test]
    fn explicit_burst_wins() {
        let settings = RateSettings {
            requests_per_second: Some(3.0),
            burst_size: Some(1),
        };
        assert_eq!(settings.burst_size(), 1);
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let settings = Settings::load_from("/definitely/not/a/real/path.json");
        assert!(!settings.disable_embeddings);
        assert_eq!(settings.embedding_producer, ProducerKind::Local);
        assert_eq!(settings.embedding.requests_per_second(), 5.0);
    }

    #[test]
    fn settings_parse_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "disableEmbeddings": true,
                "embeddingProducer": "worker",
                "workerAddr": "127.0.0.1:9000",
                "embedding": { "requestsPerSecond": 2 },
                "llm": { "requestsPerSecond": 1, "burstSize": 4 }
            }"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path);
        assert!(settings.disable_embeddings);
        assert_eq!(settings.embedding_producer, ProducerKind::Worker);
        assert_eq!(settings.worker_addr(), "127.0.0.1:9000");
        assert_eq!(settings.embedding.burst_size(), 4);
        assert_eq!(settings.llm.burst_size(), 4);
    }
}
