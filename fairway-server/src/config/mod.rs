//! Configuration module for fairway-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::FileConfig;
use fairway_core::config::{GuildRoles, TagSwapConfig, WorkerConfig};
use fairway_sdk::objects::{GuildId, UserId};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
#[derive(Debug)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub workers: WorkerConfig,
    pub tag_swap: TagSwapConfig,
    pub roles: GuildRoles,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read the TOML file, apply CLI overrides, validate and convert.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        parse(&config_content, self.listen_override)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }
}

fn parse(content: &str, listen_override: Option<SocketAddr>) -> Result<LoadedConfig, ConfigError> {
    let mut file_config: FileConfig = toml::from_str(content)?;
    if let Some(listen) = listen_override {
        file_config.server.listen = listen;
    }
    validate(&file_config)?;
    Ok(build_loaded_config(file_config))
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.workers.count == 0 {
        return Err(ConfigError::ValidationError(
            "workers.count must be at least 1".to_string(),
        ));
    }
    if config.workers.max_delivery_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "workers.max_delivery_attempts must be at least 1".to_string(),
        ));
    }
    if config.tag_swap.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "tag_swap.timeout_secs must be at least 1".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for guild in &config.guilds {
        if !seen.insert(guild.guild_id) {
            return Err(ConfigError::ValidationError(format!(
                "guild {} is configured more than once",
                guild.guild_id
            )));
        }
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let admins: HashMap<GuildId, HashSet<UserId>> = file_config
        .guilds
        .into_iter()
        .map(|g| {
            let users = g.admins.into_iter().map(UserId).collect();
            (GuildId(g.guild_id), users)
        })
        .collect();

    LoadedConfig {
        listen: file_config.server.listen,
        workers: WorkerConfig {
            workers: file_config.workers.count,
            max_delivery_attempts: file_config.workers.max_delivery_attempts,
            channel_capacity: file_config.workers.channel_capacity,
        },
        tag_swap: TagSwapConfig {
            timeout: Duration::from_secs(file_config.tag_swap.timeout_secs),
        },
        roles: GuildRoles::new(admins),
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_override_and_roles() {
        let content = r#"
[server]
listen = "127.0.0.1:3000"

[[guilds]]
guild_id = 9
admins = [77]
"#;
        let override_addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let loaded = parse(content, Some(override_addr)).unwrap();
        assert_eq!(loaded.listen, override_addr);
        assert!(loaded.roles.is_admin(GuildId(9), UserId(77)));
        assert!(!loaded.roles.is_admin(GuildId(10), UserId(77)));
        assert_eq!(loaded.tag_swap.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_workers = "[server]\n[workers]\ncount = 0\n";
        assert!(matches!(
            parse(zero_workers, None),
            Err(ConfigError::ValidationError(_))
        ));

        let duplicate_guild = "[server]\n[[guilds]]\nguild_id = 1\n[[guilds]]\nguild_id = 1\n";
        assert!(matches!(
            parse(duplicate_guild, None),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
