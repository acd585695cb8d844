//! Configuration file parser for ~/.config/feedpull/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::fetch::{
    FetchSettings, DEFAULT_ACCEPT_LANGUAGE, DEFAULT_MAX_REQUESTS_PER_MINUTE, DEFAULT_MAX_RETRIES,
    DEFAULT_TIMEOUT, DEFAULT_USER_AGENTS, DEFAULT_WORKERS,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Fetcher configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Memoize parsed feeds for the lifetime of the process.
    pub cache_enabled: bool,

    /// Maximum number of feeds fetched concurrently.
    pub max_workers: usize,

    /// Attempts per feed, including the first.
    pub max_retries: u32,

    /// Outbound request ceiling within any trailing 60 seconds.
    pub max_requests_per_minute: u32,

    /// Per-request timeout covering connect, send and body.
    pub request_timeout_secs: u64,

    /// Accept-Language header value.
    pub accept_language: String,

    /// User-Agent rotation; attempt N uses entry (N - 1) mod len.
    pub user_agents: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            max_workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            request_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "cache_enabled",
        "max_workers",
        "max_retries",
        "max_requests_per_minute",
        "request_timeout_secs",
        "accept_language",
        "user_agents",
    ];

    /// Default location: `$HOME/.config/feedpull/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("feedpull")
                .join("config.toml"),
        )
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    /// - Zero or empty values are clamped by [`Config::normalized`]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {} // Size is within limits, proceed
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        let config = config.normalized();
        tracing::info!(
            path = %path.display(),
            workers = config.max_workers,
            retries = config.max_retries,
            per_minute = config.max_requests_per_minute,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Clamps values that would stall or disable fetching.
    pub fn normalized(mut self) -> Self {
        if self.max_workers == 0 {
            tracing::warn!("max_workers = 0 is invalid, using 1");
            self.max_workers = 1;
        }
        if self.max_retries == 0 {
            tracing::warn!("max_retries = 0 is invalid, using 1");
            self.max_retries = 1;
        }
        if self.max_requests_per_minute == 0 {
            tracing::warn!("max_requests_per_minute = 0 is invalid, using 1");
            self.max_requests_per_minute = 1;
        }
        if self.request_timeout_secs == 0 {
            tracing::warn!("request_timeout_secs = 0 is invalid, using 1");
            self.request_timeout_secs = 1;
        }
        self.user_agents.retain(|ua| !ua.trim().is_empty());
        if self.user_agents.is_empty() {
            tracing::warn!("user_agents is empty, using built-in rotation");
            self.user_agents = DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            max_requests_per_minute: self.max_requests_per_minute,
            user_agents: Arc::from(self.user_agents.clone()),
            accept_language: self.accept_language.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("feedpull_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.cache_enabled);
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_requests_per_minute, 30);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.user_agents.len(), 3);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedpull_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.max_workers, 5);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "");
        let config = Config::load(&path).unwrap();
        assert!(config.cache_enabled);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_retries, 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "max_workers = 8\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_retries, 3); // default
        assert!(config.cache_enabled); // default
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
cache_enabled = false
max_workers = 10
max_retries = 5
max_requests_per_minute = 60
request_timeout_secs = 30
accept_language = "de-DE,de;q=0.9"
user_agents = ["agent-one", "agent-two"]
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert!(!config.cache_enabled);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_requests_per_minute, 60);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.accept_language, "de-DE,de;q=0.9");
        assert_eq!(config.user_agents, vec!["agent-one", "agent-two"]);

        let settings = config.fetch_settings();
        assert_eq!(settings.max_requests_per_minute, 60);
        assert_eq!(settings.user_agents.len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let result = Config::load(&path);
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
max_workers = 2
totally_fake_key = "should not fail"
"#;
        let (dir, path) = write_config("unknown", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_workers, 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "max_workers = \"many\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let content = r#"
max_workers = 0
max_retries = 0
max_requests_per_minute = 0
request_timeout_secs = 0
user_agents = []
"#;
        let (dir, path) = write_config("zeros", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.max_requests_per_minute, 1);
        assert_eq!(config.request_timeout_secs, 1);
        assert_eq!(config.user_agents.len(), DEFAULT_USER_AGENTS.len());
        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
