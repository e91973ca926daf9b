//! Admin role lookup used to authorize round edits and deletions.

use async_trait::async_trait;
use fairway_sdk::objects::{GuildId, UserId};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use super::ConfigStore;

#[derive(Debug, Error)]
pub enum RoleError {
    #[error("role lookup failed: {0}")]
    Lookup(String),
}

/// Resolves whether a user holds the admin role in a guild.
#[async_trait]
pub trait RoleAuthority: Send + Sync {
    async fn is_admin(&self, guild_id: GuildId, user_id: UserId) -> Result<bool, RoleError>;
}

/// Admin user ids per guild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildRoles {
    admins: HashMap<GuildId, HashSet<UserId>>,
}

impl GuildRoles {
    pub fn new(admins: HashMap<GuildId, HashSet<UserId>>) -> Self {
        Self { admins }
    }

    pub fn is_admin(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.admins
            .get(&guild_id)
            .is_some_and(|users| users.contains(&user_id))
    }

    /// Number of guilds with at least one configured entry.
    pub fn guild_count(&self) -> usize {
        self.admins.len()
    }
}

/// [`RoleAuthority`] backed by the reloadable `[[guilds]]` config section.
#[derive(Clone)]
pub struct ConfigRoleAuthority {
    roles: ConfigStore<GuildRoles>,
}

impl ConfigRoleAuthority {
    pub fn new(roles: ConfigStore<GuildRoles>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl RoleAuthority for ConfigRoleAuthority {
    async fn is_admin(&self, guild_id: GuildId, user_id: UserId) -> Result<bool, RoleError> {
        Ok(self.roles.current().is_admin(guild_id, user_id))
    }
}
