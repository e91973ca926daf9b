//! Runtime configuration types.
//!
//! These are the validated values the processors run with. Loading and
//! parsing the TOML file is handled by the server crate.

mod config_store;
mod roles;

pub use config_store::{ConfigStore, ConfigWatcher, Snapshot};
pub use roles::{ConfigRoleAuthority, GuildRoles, RoleAuthority, RoleError};

use std::time::Duration;

/// Default bounded window a swap request waits for its counterpart.
pub const DEFAULT_SWAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Event worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of concurrent handler invocations.
    pub workers: usize,
    /// Deliveries of an undecodable message before it is dead-lettered.
    pub max_delivery_attempts: u32,
    /// Bus queue capacity.
    pub channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_delivery_attempts: 3,
            channel_capacity: crate::events::DEFAULT_CHANNEL_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagSwapConfig {
    pub timeout: Duration,
}

impl Default for TagSwapConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SWAP_TIMEOUT,
        }
    }
}
