use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::failure::RetryPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chat_api_key: Option<String>,
    pub chat_base_url: Option<String>,
    pub chat_model: String,
    pub image_api_key: Option<String>,
    pub image_base_url: Option<String>,
    pub image_model: String,
    pub cache_dir: PathBuf,
    /// Entries older than this are treated as misses. Zero disables caching.
    pub cache_ttl_hours: u64,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub call_timeout_secs: u64,
    pub run_timeout_secs: u64,
    pub slide_width: u32,
    pub slide_height: u32,
    pub template_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chat_api_key: None,
            chat_base_url: None,
            chat_model: "gpt-4o-mini".to_string(),
            image_api_key: None,
            image_base_url: None,
            image_model: "gemini-3-pro-image-preview".to_string(),
            cache_dir: PathBuf::from(".deckgen/cache"),
            cache_ttl_hours: 168,
            output_dir: PathBuf::from("deckgen_out"),
            workers: 4,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 60_000,
            call_timeout_secs: 120,
            run_timeout_secs: 900,
            slide_width: 1600,
            slide_height: 900,
            template_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "toml") {
            Ok(toml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }

    /// Load from the first config file that exists, falling back to the
    /// defaults when none does.
    pub fn load_with_fallback() -> Self {
        let candidates = [
            ".deckgen/config.json",
            ".deckgen/config.toml",
            "deckgen.config.json",
            "deckgen.config.toml",
        ];
        for candidate in candidates {
            let path = Path::new(candidate);
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(path) {
                Ok(config) => {
                    tracing::info!(path = candidate, "loaded config");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(path = candidate, error = %e, "config file unreadable, skipping");
                }
            }
        }
        tracing::info!("no config file found, using defaults");
        Self::default()
    }

    /// Environment overrides. API keys always come from the environment
    /// when present; the rest are opt-in knobs.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.chat_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.image_api_key = Some(key);
        }
        if let Ok(model) = std::env::var("DECKGEN_CHAT_MODEL") {
            self.chat_model = model;
        }
        if let Ok(model) = std::env::var("DECKGEN_IMAGE_MODEL") {
            self.image_model = model;
        }
        if let Ok(dir) = std::env::var("DECKGEN_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("DECKGEN_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("DECKGEN_TEMPLATE_DIR") {
            self.template_dir = Some(PathBuf::from(dir));
        }
        if let Ok(raw) = std::env::var("DECKGEN_WORKERS") {
            match raw.parse() {
                Ok(n) if n > 0 => self.workers = n,
                _ => tracing::warn!(value = %raw, "ignoring invalid DECKGEN_WORKERS"),
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_base_ms: self.backoff_base_ms,
            backoff_cap_ms: self.backoff_cap_ms.max(self.backoff_base_ms),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs.max(1))
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        if self.cache_ttl_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cache_ttl_hours * 3600))
        }
    }
}
