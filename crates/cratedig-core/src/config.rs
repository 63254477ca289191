//! YAML configuration with serde defaults.
//!
//! Every section and field falls back to a sensible default, so an empty file
//! (or no file at all) yields a working configuration. Validation failures and
//! a missing API key abort the run before any item is dispatched.

use crate::errors::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub api: ApiConfig,
    pub caching: CachingConfig,
    pub concurrency: ConcurrencyConfig,
    pub library: LibraryConfig,
    pub categories: CategoriesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub model: String,
    /// Cheaper model used for the JSON repair pass.
    pub repair_model: String,
    pub max_retries: u32,
    pub timeout_seconds: f64,
    pub base_delay_seconds: f64,
    pub max_delay_seconds: f64,
    /// Wait applied to a rate-limit response that carries no advised interval.
    pub rate_limit_fallback_seconds: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            repair_model: "gpt-4o-mini".to_string(),
            max_retries: 3,
            timeout_seconds: 30.0,
            base_delay_seconds: 1.0,
            max_delay_seconds: 60.0,
            rate_limit_fallback_seconds: 60,
            temperature: 0.0,
            max_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CachingConfig {
    pub execution_cache_file: String,
    pub response_cache_file: String,
    /// L2 entries older than this are treated as absent.
    pub expiry_days: u32,
    /// L1 records older than this are deleted by the retention sweep.
    pub retention_days: u32,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            execution_cache_file: "~/.cache/cratedig/execution.db".to_string(),
            response_cache_file: "~/.cache/cratedig/responses.json".to_string(),
            expiry_days: 30,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencyConfig {
    pub max_workers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    pub audio_extensions: Vec<String>,
    pub ignored_dirs: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            audio_extensions: [
                "flac", "mp3", "m4a", "wav", "aiff", "ogg", "opus", "ape", "wv", "dsf", "dff",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignored_dirs: ["covers", "artwork", "scans", "booklet", "@eadir"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CategoriesConfig {
    pub top_buckets: Vec<String>,
    pub soundtrack_subs: Vec<String>,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            top_buckets: [
                "Classical",
                "Electronic",
                "Jazz",
                "Compilations & VA",
                "Soundtracks",
                "Library",
                "Misc",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            soundtrack_subs: ["Film", "TV", "Games", "Anime", "Stage & Musicals"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Load from a YAML file, or return defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    ConfigError(format!("failed to read config {}: {}", p.display(), e))
                })?;
                serde_yaml::from_str(&text).map_err(|e| {
                    ConfigError(format!("failed to parse yaml {}: {}", p.display(), e))
                })?
            }
            None => Config::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency.max_workers == 0 {
            return Err(ConfigError("concurrency.max_workers must be >= 1".into()));
        }
        if self.api.timeout_seconds <= 0.0 {
            return Err(ConfigError("api.timeout_seconds must be positive".into()));
        }
        if self.api.max_delay_seconds < self.api.base_delay_seconds {
            return Err(ConfigError(
                "api.max_delay_seconds must be >= api.base_delay_seconds".into(),
            ));
        }
        if self.api.model.trim().is_empty() {
            return Err(ConfigError("api.model must not be empty".into()));
        }
        Ok(())
    }

    pub fn execution_cache_path(&self) -> PathBuf {
        expand_tilde(&self.caching.execution_cache_file)
    }

    pub fn response_cache_path(&self) -> PathBuf {
        expand_tilde(&self.caching.response_cache_file)
    }
}

/// API key comes from the environment only; it never lives in the config file.
pub fn api_key_from_env() -> Result<String, ConfigError> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ConfigError("OPENAI_API_KEY is not set".into()))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
