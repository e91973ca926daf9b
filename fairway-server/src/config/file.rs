//! TOML file configuration structures.
//!
//! These structs directly map to the `fairway.toml` file format.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub tag_swap: TagSwapConfig,
    #[serde(default)]
    pub guilds: Vec<GuildConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Event worker pool section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of concurrent event workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Deliveries of an undecodable message before it is dead-lettered.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    /// Capacity of the observer broadcast.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_worker_count() -> usize {
    4
}

fn default_max_delivery_attempts() -> u32 {
    3
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            max_delivery_attempts: default_max_delivery_attempts(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Tag swap section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSwapConfig {
    /// How long a swap request waits for its counterpart.
    #[serde(default = "default_swap_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_swap_timeout_secs() -> u64 {
    30
}

impl Default for TagSwapConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_swap_timeout_secs(),
        }
    }
}

/// Per-guild settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: u64,
    /// Users allowed to edit and delete any round in the guild.
    #[serde(default)]
    pub admins: Vec<u64>,
}
