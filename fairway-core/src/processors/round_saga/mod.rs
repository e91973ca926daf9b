//! RoundSaga processor.
//!
//! The RoundSaga is the controller of the round lifecycle. Each incoming
//! event is one hop: the saga re-reads the round from the store, applies
//! the aggregate transition and returns the caused event(s). Nothing is
//! kept in memory between hops; multi-hop flows carry their continuation
//! state in the payloads.
//!
//! Hops are grouped by concern:
//!
//! - `lifecycle`: creation, editing, deletion, start
//! - `participation`: join (with the tag lookup round trip) and removal
//! - `scoring`: score validation, application and quorum detection
//! - `finalization`: `AllScoresSubmitted` / `RoundFinalizeRequested`
//! - `tag_propagation`: `ScheduledRoundTagUpdate`
//!
//! A hop that cannot proceed always produces a terminal error event that
//! carries the original request.
//!
//! Hops on the same round may run on different workers at once. Writes go
//! through [`RoundSaga::commit`], which re-reads the round and replays the
//! change when another hop wrote first.

mod finalization;
mod lifecycle;
mod participation;
mod scoring;
mod tag_propagation;

#[cfg(test)]
mod test_support;

use crate::config::{RoleAuthority, RoleError};
use crate::entities::{Round, RoundError, RoundStore, StoreError};
use crate::processors::dispatcher::EventHandler;
use async_trait::async_trait;
use fairway_sdk::events::{Envelope, RoundEvent};
use fairway_sdk::objects::{GuildId, RoundId, UserId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Attempts at a conflicting write before the hop gives up.
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Why a hop could not proceed. The display text becomes the `reason` of
/// the terminal error event.
#[derive(Debug, Error)]
pub enum HopError {
    #[error("round id is required")]
    MissingRoundId,

    #[error("at least one field must be provided for an update")]
    NoChanges,

    #[error("{0}")]
    Invalid(String),

    #[error("round {0} not found")]
    RoundNotFound(RoundId),

    #[error("only the round creator or an admin may {action} this round")]
    Unauthorized { action: &'static str },

    #[error("round belongs to guild {actual}, not {expected}")]
    GuildMismatch { expected: GuildId, actual: GuildId },

    #[error(transparent)]
    Round(#[from] RoundError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("role lookup error: {0}")]
    Role(#[from] RoleError),
}

impl HopError {
    /// Infrastructure failures, as opposed to business rejections.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, HopError::Store(_) | HopError::Role(_))
    }

    fn report(&self, hop: &'static str, round_id: RoundId) {
        if self.is_infrastructure() {
            error!(hop, round_id = %round_id, error = %self, "Round hop failed");
        } else {
            warn!(hop, round_id = %round_id, reason = %self, "Round hop rejected");
        }
    }
}

pub struct RoundSaga {
    store: Arc<dyn RoundStore>,
    roles: Arc<dyn RoleAuthority>,
}

impl RoundSaga {
    pub fn new(store: Arc<dyn RoundStore>, roles: Arc<dyn RoleAuthority>) -> Self {
        Self { store, roles }
    }

    /// Load a round for mutation. Absence is terminal for the hop.
    async fn load(&self, guild_id: GuildId, round_id: RoundId) -> Result<Round, HopError> {
        self.store
            .get_round(guild_id, round_id)
            .await?
            .ok_or(HopError::RoundNotFound(round_id))
    }

    /// Apply `change` to `round` and write it back.
    ///
    /// `change` returns whether there is anything to write. On a version
    /// conflict the round is loaded again and `change` replays on the fresh
    /// copy. Returns the round as written (or as read, when nothing
    /// changed) and whether it was written.
    async fn commit<F>(&self, mut round: Round, mut change: F) -> Result<(Round, bool), HopError>
    where
        F: FnMut(&mut Round) -> Result<bool, HopError> + Send,
    {
        let mut attempt = 1;
        loop {
            if !change(&mut round)? {
                return Ok((round, false));
            }
            match self.store.update_round(&round).await {
                Ok(()) => return Ok((round, true)),
                Err(StoreError::Conflict(round_id)) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(round_id = %round_id, attempt, "Round changed underneath, retrying");
                    attempt += 1;
                    round = self.load(round.guild_id, round_id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The creator may always act on a round, anyone else needs the admin
    /// role in the round's guild.
    async fn authorize(
        &self,
        round: &Round,
        user_id: UserId,
        action: &'static str,
    ) -> Result<(), HopError> {
        if round.created_by == user_id {
            return Ok(());
        }
        if self.roles.is_admin(round.guild_id, user_id).await? {
            return Ok(());
        }
        Err(HopError::Unauthorized { action })
    }

    /// Run the hop for one decoded event.
    pub async fn dispatch(&self, guild_id: GuildId, event: &RoundEvent) -> Vec<RoundEvent> {
        match event {
            RoundEvent::RoundCreationRequested(e) => self.on_creation_requested(guild_id, e),
            RoundEvent::RoundEntityCreated(e) => self.on_entity_created(guild_id, e).await,
            RoundEvent::RoundUpdateRequested(e) => self.on_update_requested(guild_id, e).await,
            RoundEvent::RoundDeleteRequested(e) => self.on_delete_requested(guild_id, e).await,
            RoundEvent::RoundStartRequested(e) => self.on_start_requested(guild_id, e).await,
            RoundEvent::ParticipantJoinRequested(e) => {
                self.on_join_requested(guild_id, e).await
            }
            RoundEvent::ParticipantJoinValidationRequested(e) => {
                self.on_join_validated(guild_id, e).await
            }
            RoundEvent::TagLookupResult(e) => self.on_tag_lookup_result(guild_id, e).await,
            RoundEvent::ParticipantRemovalRequested(e) => {
                self.on_removal_requested(guild_id, e).await
            }
            RoundEvent::ScoreUpdateRequested(e) => {
                self.on_score_update_requested(guild_id, e).await
            }
            RoundEvent::ScoreUpdateValidated(e) => self.on_score_validated(guild_id, e).await,
            RoundEvent::ParticipantScoreUpdated(e) => self.on_score_updated(e),
            RoundEvent::AllScoresSubmitted(e) => self.finalize(guild_id, e.round_id).await,
            RoundEvent::RoundFinalizeRequested(e) => self.finalize(guild_id, e.round_id).await,
            RoundEvent::ScheduledRoundTagUpdate(e) => self.on_tag_update(guild_id, e).await,

            // Terminal, or consumed by other modules.
            RoundEvent::RoundCreated(_)
            | RoundEvent::RoundValidationFailed(_)
            | RoundEvent::RoundCreationFailed(_)
            | RoundEvent::RoundUpdated(_)
            | RoundEvent::RoundUpdateError(_)
            | RoundEvent::RoundDeleted(_)
            | RoundEvent::RoundDeleteError(_)
            | RoundEvent::RoundStarted(_)
            | RoundEvent::RoundStartFailed(_)
            | RoundEvent::TagLookupRequest(_)
            | RoundEvent::ParticipantJoined(_)
            | RoundEvent::RoundParticipantJoinError(_)
            | RoundEvent::ParticipantRemoved(_)
            | RoundEvent::RoundParticipantRemovalError(_)
            | RoundEvent::RoundScoreUpdateError(_)
            | RoundEvent::ScoresPartiallySubmitted(_)
            | RoundEvent::RoundFinalized(_)
            | RoundEvent::RoundFinalizationFailed(_)
            | RoundEvent::ProcessRoundScoresRequest(_)
            | RoundEvent::TagsUpdatedForScheduledRounds(_)
            | RoundEvent::ScheduledRoundTagUpdateFailed(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl EventHandler for RoundSaga {
    fn name(&self) -> &'static str {
        "RoundSaga"
    }

    async fn handle(&self, envelope: &Envelope) -> Vec<Envelope> {
        let caused = self.dispatch(envelope.guild_id, &envelope.event).await;
        if !caused.is_empty() {
            debug!(
                event = %envelope.kind(),
                correlation_id = %envelope.correlation_id,
                caused = caused.len(),
                "RoundSaga hop complete"
            );
        }
        caused
            .into_iter()
            .map(|event| envelope.follow_up(event))
            .collect()
    }
}

fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
