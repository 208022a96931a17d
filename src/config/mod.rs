//! Configuration module for Locus.

use crate::error::{LocusError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a Locus process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocusConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Model artifact configuration.
    #[serde(default)]
    pub model: ModelConfig,
    /// Request history configuration.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl LocusConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LocusError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            LocusError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.model.artifact_path.as_os_str().is_empty() {
            return Err(LocusError::InvalidConfig {
                field: "model.artifact_path".to_string(),
                reason: "Artifact path must not be empty".to_string(),
            });
        }

        if self.history.capacity == 0 {
            return Err(LocusError::InvalidConfig {
                field: "history.capacity".to_string(),
                reason: "History capacity must be non-zero".to_string(),
            });
        }

        if !self.server.api_prefix.starts_with('/') {
            return Err(LocusError::InvalidConfig {
                field: "server.api_prefix".to_string(),
                reason: "API prefix must start with '/'".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
                ..Default::default()
            },
            model: ModelConfig {
                artifact_path: PathBuf::from("artifacts/model.bin"),
                preload: false,
            },
            history: HistoryConfig {
                capacity: 1_000,
                ..Default::default()
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                log_level: "debug".to_string(),
                ..Default::default()
            },
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the API server.
    pub bind_addr: SocketAddr,
    /// Prefix for versioned API routes.
    pub api_prefix: String,
    /// Grace period for in-flight requests on shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            api_prefix: "/api/v1".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Model artifact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the serialized artifact.
    pub artifact_path: PathBuf,
    /// Load at startup and refuse to serve when loading fails.
    pub preload: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("artifacts/model.bin"),
            preload: true,
        }
    }
}

/// Request history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of records kept in memory.
    pub capacity: usize,
    /// Records older than this are purged.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            retention: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            scaled_secs(s_val, 1)
        } else if let Some(m) = s.strip_suffix('m') {
            scaled_secs(m, 60)
        } else if let Some(h) = s.strip_suffix('h') {
            scaled_secs(h, 3600)
        } else if let Some(d) = s.strip_suffix('d') {
            scaled_secs(d, 86_400)
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }

    fn scaled_secs(value: &str, unit_secs: u64) -> Result<Duration, String> {
        let v = value.parse::<u64>().map_err(|e| e.to_string())?;
        v.checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LocusConfig::default();
        assert_eq!(config.server.api_prefix, "/api/v1");
        assert!(config.model.preload);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = LocusConfig::development();
        assert!(!config.model.preload);
        assert!(!config.observability.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = LocusConfig::default();
        config.history.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(LocusError::InvalidConfig { field, .. }) if field == "history.capacity"
        ));
    }

    #[test]
    fn test_parse_duration_units() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86_400));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        use humantime_serde::parse_duration;
        let max = u64::MAX;
        assert!(parse_duration(&format!("{}d", max)).is_err());
        assert!(parse_duration(&format!("{}h", max / 1000)).is_err());
        assert!(parse_duration(&format!("{}m", max)).is_err());
        assert_eq!(
            parse_duration(&format!("{}s", max)).unwrap(),
            Duration::from_secs(max)
        );
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model": {{"artifact_path": "/srv/model.bin", "preload": false}},
                "history": {{"capacity": 50, "retention": "12h"}}}}"#
        )
        .unwrap();

        let config = LocusConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model.artifact_path, PathBuf::from("/srv/model.bin"));
        assert_eq!(config.history.capacity, 50);
        assert_eq!(config.history.retention, Duration::from_secs(12 * 3600));
        assert_eq!(config.server.api_prefix, "/api/v1");
    }
}
