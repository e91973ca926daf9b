//! Persistent entities and the storage seams the saga talks to.
//!
//! `RoundStore` and `TagLedger` are implemented by both
//! [`DatabaseProcessor`](crate::framework::DatabaseProcessor) (Postgres) and
//! [`MemoryProcessor`](crate::framework::MemoryProcessor).

pub mod leaderboard_tags;
pub mod round;
pub mod round_records;

use async_trait::async_trait;
use fairway_sdk::objects::{GuildId, RoundId, UserId};
use thiserror::Error;

pub use leaderboard_tags::{LedgerError, TagHolding, TagLedger};
pub use round::{NewRound, Round, RoundEdit, RoundError, Upsert};

/// Errors returned by a [`RoundStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Update targeted a round that does not exist
    #[error("round {0} not found")]
    NotFound(RoundId),

    /// The round changed since it was read
    #[error("round {0} was modified concurrently")]
    Conflict(RoundId),

    /// A stored row could not be turned back into an aggregate
    #[error("corrupt round {round_id}: {reason}")]
    Corrupt { round_id: RoundId, reason: String },
}

/// Source of truth for rounds. All access is scoped by guild.
#[async_trait]
pub trait RoundStore: Send + Sync {
    async fn get_round(
        &self,
        guild_id: GuildId,
        round_id: RoundId,
    ) -> Result<Option<Round>, StoreError>;

    async fn insert_round(&self, round: &Round) -> Result<(), StoreError>;

    /// Overwrite an existing round if it is still at `round.version()`,
    /// bumping the stored version. Fails with [`StoreError::Conflict`] when
    /// another write got there first and with [`StoreError::NotFound`] if
    /// the round was deleted in the meantime.
    async fn update_round(&self, round: &Round) -> Result<(), StoreError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete_round(&self, guild_id: GuildId, round_id: RoundId) -> Result<bool, StoreError>;

    /// `Upcoming` and `InProgress` rounds containing any of `users`.
    async fn scheduled_rounds_with_users(
        &self,
        guild_id: GuildId,
        users: &[UserId],
    ) -> Result<Vec<Round>, StoreError>;
}
