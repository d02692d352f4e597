//! Configuration management.
//!
//! Values come from an optional file and `WAYPOINT__SECTION__KEY` environment
//! variables, environment winning. Every section has defaults, so an empty
//! configuration runs with the in-memory directory.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::audit::AuditConfig;
use crate::cache::CacheConfig;
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "WAYPOINT";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    /// PostgreSQL directory and audit store. Absent means in-memory only.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a file (format by extension), then the environment.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// [`Config::from_file`] when a path is given, otherwise [`Config::load`].
    pub fn load_optional(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSinkKind;
    use crate::cache::TtlClass;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.ttl_for(TtlClass::Short), Duration::from_secs(30));
        assert_eq!(config.audit.buffer_capacity, 1024);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[cache]
short_ttl = "10s"
long_grace = "2h"
max_capacity = 500

[audit]
buffer_capacity = 64
sink = "memory"

[database]
url = "postgres://localhost/waypoint"
acquire_timeout = "750ms"

[logging]
level = "debug"
format = "pretty"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cache.short_ttl, Duration::from_secs(10));
        assert_eq!(config.cache.long_grace, Duration::from_secs(7200));
        assert_eq!(config.cache.medium_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.max_capacity, 500);
        assert_eq!(config.audit.buffer_capacity, 64);
        assert_eq!(config.audit.sink, AuditSinkKind::Memory);

        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 20);
        assert_eq!(database.acquire_timeout, Duration::from_millis(750));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_unknown_audit_sink_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[audit]\nsink = \"syslog\"").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::from_file("/nonexistent/waypoint.toml").is_err());
    }
}
