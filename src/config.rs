use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Storage configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Retention sweep configuration
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Realtime relay configuration
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Storage backend selection. When no URL is configured the service falls
/// back to the in-memory store: the API starts, but nothing survives a
/// restart.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL, e.g. "sqlite:database/data.db?mode=rwc".
    #[serde(default)]
    pub url: Option<String>,
}

/// Configuration for the location-history retention sweep
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Interval in seconds between sweep cycles (default: 30)
    #[serde(default = "RetentionConfig::default_interval_secs")]
    pub interval_secs: u64,
    /// Seconds after a trip ends before its history becomes prunable
    /// (default: 60)
    #[serde(default = "RetentionConfig::default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            grace_period_secs: Self::default_grace_period_secs(),
        }
    }
}

impl RetentionConfig {
    fn default_interval_secs() -> u64 {
        30
    }
    fn default_grace_period_secs() -> u64 {
        60
    }

    pub fn validate(&self) {
        if self.interval_secs == 0 {
            panic!("retention.interval_secs must be greater than zero");
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Broadcast channel capacity. Slow subscribers beyond this lag and skip
    /// ahead; the reconciliation poll heals whatever they missed.
    #[serde(default = "RelayConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

impl RelayConfig {
    fn default_channel_capacity() -> usize {
        64
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = serde_yaml::from_str("cors_permissive: true").unwrap();
        assert!(config.cors_permissive);
        assert!(config.database.url.is_none());
        assert_eq!(config.retention.interval_secs, 30);
        assert_eq!(config.retention.grace_period_secs, 60);
        assert_eq!(config.relay.channel_capacity, 64);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let yaml = r#"
cors_origins:
  - "https://example.com"
database:
  url: "sqlite:database/data.db?mode=rwc"
retention:
  interval_secs: 10
  grace_period_secs: 120
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cors_origins.len(), 1);
        assert_eq!(
            config.database.url.as_deref(),
            Some("sqlite:database/data.db?mode=rwc")
        );
        assert_eq!(config.retention.interval_secs, 10);
        assert_eq!(config.retention.grace_period_secs, 120);
    }
}
