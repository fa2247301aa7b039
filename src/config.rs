//! Relay configuration.
//!
//! Settings come from an optional TOML file; a missing file yields
//! `Config::default()`. Command-line flags and environment variables are
//! applied on top by the binary, then [`Config::validate`] checks that the
//! required values are present.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::reader::{DedupTtl, FeedRegistration, ReaderOptions};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level relay configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The custom Debug impl masks `publisher_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed to poll (RSS_URL).
    pub feed_url: Option<String>,

    /// Code attached to every published item (RSS_CODE).
    pub feed_code: Option<String>,

    /// Dedup identity of the feed. Falls back to `feed_code`.
    pub feed_name: Option<String>,

    pub poll_interval_secs: u64,

    pub fetch_timeout_secs: u64,

    /// Items buffered between the poller and the publisher.
    pub output_capacity: usize,

    pub bootstrap_ttl_hours: u64,

    pub delivered_ttl_hours: u64,

    /// SQLite database holding dedup records.
    pub store_path: String,

    /// Ingest endpoint items are POSTed to.
    pub publisher_url: Option<String>,

    pub publisher_token: Option<String>,

    /// Marks published envelopes as test traffic.
    pub testing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: None,
            feed_code: None,
            feed_name: None,
            poll_interval_secs: 60,
            fetch_timeout_secs: 10,
            output_capacity: 500,
            bootstrap_ttl_hours: 72,
            delivered_ttl_hours: 336,
            store_path: "rss-relay.db".to_string(),
            publisher_url: None,
            publisher_token: None,
            testing: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feed_url", &self.feed_url)
            .field("feed_code", &self.feed_code)
            .field("feed_name", &self.feed_name)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("output_capacity", &self.output_capacity)
            .field("bootstrap_ttl_hours", &self.bootstrap_ttl_hours)
            .field("delivered_ttl_hours", &self.delivered_ttl_hours)
            .field("store_path", &self.store_path)
            .field("publisher_url", &self.publisher_url)
            .field(
                "publisher_token",
                &self.publisher_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("testing", &self.testing)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 12] = [
        "feed_url",
        "feed_code",
        "feed_name",
        "poll_interval_secs",
        "fetch_timeout_secs",
        "output_capacity",
        "bootstrap_ttl_hours",
        "delivered_ttl_hours",
        "store_path",
        "publisher_url",
        "publisher_token",
        "testing",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
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
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check required settings and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let feed_url = non_blank(&self.feed_url).ok_or(ConfigError::Missing("feed_url (RSS_URL)"))?;
        non_blank(&self.feed_code).ok_or(ConfigError::Missing("feed_code (RSS_CODE)"))?;
        let publisher_url = non_blank(&self.publisher_url)
            .ok_or(ConfigError::Missing("publisher_url (PUBLISHER_URL)"))?;

        for (name, value) in [("feed_url", feed_url), ("publisher_url", publisher_url)] {
            let parsed = url::Url::parse(value)
                .map_err(|e| ConfigError::Invalid(format!("{name} '{value}': {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "{name} '{value}': only http/https allowed"
                )));
            }
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.output_capacity == 0 {
            return Err(ConfigError::Invalid(
                "output_capacity must be greater than 0".to_string(),
            ));
        }
        if self.delivered_ttl_hours < self.bootstrap_ttl_hours {
            return Err(ConfigError::Invalid(format!(
                "delivered_ttl_hours ({}) must not be shorter than bootstrap_ttl_hours ({})",
                self.delivered_ttl_hours, self.bootstrap_ttl_hours
            )));
        }
        Ok(())
    }

    /// Code attached to published items. Empty until validated.
    pub fn feed_code(&self) -> &str {
        self.feed_code.as_deref().map(str::trim).unwrap_or_default()
    }

    /// Registration for the configured feed.
    pub fn feed_registration(&self) -> Result<FeedRegistration, ConfigError> {
        let url = non_blank(&self.feed_url).ok_or(ConfigError::Missing("feed_url (RSS_URL)"))?;
        let name = non_blank(&self.feed_name)
            .or_else(|| non_blank(&self.feed_code))
            .ok_or(ConfigError::Missing("feed_code (RSS_CODE)"))?;
        Ok(
            FeedRegistration::new(url, Duration::from_secs(self.poll_interval_secs))
                .with_name(name),
        )
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            output_capacity: self.output_capacity,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            ttl: DedupTtl {
                bootstrap: Duration::from_secs(self.bootstrap_ttl_hours * 3600),
                delivered: Duration::from_secs(self.delivered_ttl_hours * 3600),
            },
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Config {
        Config {
            feed_url: Some("https://realnoevremya.ru/rss/yandex-dzen.xml".into()),
            feed_code: Some("rv".into()),
            publisher_url: Some("http://localhost:8080/ingest".into()),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.output_capacity, 500);
        assert_eq!(config.bootstrap_ttl_hours, 72);
        assert_eq!(config.delivered_ttl_hours, 336);
        assert_eq!(config.store_path, "rss-relay.db");
        assert!(config.feed_url.is_none());
        assert!(!config.testing);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/rss_relay_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.poll_interval_secs, 60);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("rss_relay_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.output_capacity, 500);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("rss_relay_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
feed_url = "https://example.com/rss"
feed_code = "ex"
feed_name = "example"
poll_interval_secs = 30
fetch_timeout_secs = 5
output_capacity = 100
bootstrap_ttl_hours = 24
delivered_ttl_hours = 48
store_path = "/var/lib/rss-relay/dedup.db"
publisher_url = "https://bus.example.com/ingest"
publisher_token = "secret-token"
testing = true
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.feed_url.as_deref(), Some("https://example.com/rss"));
        assert_eq!(config.feed_code(), "ex");
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.output_capacity, 100);
        assert_eq!(config.store_path, "/var/lib/rss-relay/dedup.db");
        assert_eq!(config.publisher_token.as_deref(), Some("secret-token"));
        assert!(config.testing);
        config.validate().unwrap();

        let feed = config.feed_registration().unwrap();
        assert_eq!(feed.feed_key(), "example");
        assert_eq!(feed.poll_interval, Duration::from_secs(30));

        let options = config.reader_options();
        assert_eq!(options.fetch_timeout, Duration::from_secs(5));
        assert_eq!(options.ttl.bootstrap, Duration::from_secs(24 * 3600));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("rss_relay_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let dir = std::env::temp_dir().join("rss_relay_config_test_unknown");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "poll_interval_secs = 15\nkafka_brokers = \"x\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.poll_interval_secs, 15);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let dir = std::env::temp_dir().join("rss_relay_config_test_wrongtype");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "poll_interval_secs = \"often\"\n").unwrap();

        assert!(Config::load(&path).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("rss_relay_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_requires_settings() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::Missing(_))
        ));

        let mut config = complete();
        config.feed_code = Some("   ".into());
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        let mut config = complete();
        config.publisher_url = None;
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        complete().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = complete();
        config.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = complete();
        config.output_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = complete();
        config.feed_url = Some("file:///etc/passwd".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = complete();
        config.delivered_ttl_hours = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_feed_name_defaults_to_code() {
        let feed = complete().feed_registration().unwrap();
        assert_eq!(feed.feed_key(), "rv");
        assert_eq!(feed.url, "https://realnoevremya.ru/rss/yandex-dzen.xml");
    }

    #[test]
    fn test_debug_masks_publisher_token() {
        let mut config = complete();
        config.publisher_token = Some("super-secret-token-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
