use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::ServerConfig;

/// Configuration validation error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid bind address: {0}")]
    InvalidBind(String),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid max_connections: {0}. Must be at least min_connections ({1})")]
    InvalidMaxConnections(u32, u32),

    #[error("invalid restart_cap_per_hour: {0}. Must be at least 1")]
    InvalidRestartCap(u32),

    #[error("invalid tick_interval_ms: {0}. Must be at least 1")]
    InvalidTickInterval(u64),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. `.fleet/config.yaml` (project config)
    /// 3. `.fleet/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`FLEET_` prefix, highest priority)
    ///
    /// Configuration is always project-local (pwd/.fleet/) so multiple
    /// fleets can coexist on one machine with different project dirs.
    pub fn load() -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new()
            .merge(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::file(".fleet/config.yaml"))
            .merge(Yaml::file(".fleet/local.yaml"))
            .merge(Env::prefixed("FLEET_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new()
            .merge(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("FLEET_").split("__"))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
        if config.bind.is_empty() {
            return Err(ConfigError::InvalidBind(config.bind.clone()));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections < config.database.min_connections {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
                config.database.min_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.worker.restart_cap_per_hour == 0 {
            return Err(ConfigError::InvalidRestartCap(config.worker.restart_cap_per_hour));
        }

        if config.workflow.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval(config.workflow.tick_interval_ms));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 7337);
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn yaml_parsing_overrides_defaults() {
        let yaml = r"
port: 9000
database:
  path: /custom/fleet.db
  max_connections: 20
  min_connections: 2
logging:
  level: debug
  json: true
";
        let config: ServerConfig = serde_yaml::from_str(yaml).expect("yaml should parse");
        assert_eq!(config.port, 9000);
        assert_eq!(config.database.path, "/custom/fleet.db");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn validate_rejects_empty_database_path() {
        let mut config = ServerConfig::default();
        config.database.path = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyDatabasePath)));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = ServerConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn validate_rejects_max_below_min_connections() {
        let mut config = ServerConfig::default();
        config.database.min_connections = 10;
        config.database.max_connections = 2;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxConnections(2, 10))));
    }

    #[test]
    fn hierarchical_merging_prefers_override() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "port: 1111\nlogging:\n  level: info\n  json: false").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "port: 2222\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: ServerConfig = Figment::new()
            .merge(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.port, 2222, "override should win");
        assert_eq!(config.logging.level, "debug", "override should win for nested fields");
        assert!(!config.logging.json, "base value should persist when not overridden");
    }
}
