//! Creation, editing, deletion and start.

use super::{HopError, RoundSaga, unix_now};
use crate::entities::{NewRound, Round, RoundEdit, RoundError};
use crate::utils::validation::{validate_creation, validate_edit};
use fairway_sdk::events::{
    RoundCreated, RoundCreationFailed, RoundCreationRequested, RoundDeleteError,
    RoundDeleteRequested, RoundDeleted, RoundEntityCreated, RoundEvent, RoundStartFailed,
    RoundStartRequested, RoundStarted, RoundUpdateError, RoundUpdateRequested, RoundUpdated,
    RoundValidationFailed,
};
use fairway_sdk::objects::{GuildId, RoundId, RoundInfo, RoundState};
use tracing::{debug, info, warn};

impl RoundSaga {
    /// Validate the request and build the aggregate. Nothing is stored yet.
    pub(super) fn on_creation_requested(
        &self,
        guild_id: GuildId,
        request: &RoundCreationRequested,
    ) -> Vec<RoundEvent> {
        let errors = validate_creation(request, unix_now());
        if !errors.is_empty() {
            warn!(
                guild_id = %guild_id,
                user_id = %request.user_id,
                errors = ?errors,
                "Round creation rejected"
            );
            return vec![
                RoundValidationFailed {
                    user_id: request.user_id,
                    errors,
                }
                .into(),
            ];
        }

        let round = Round::new(NewRound {
            guild_id,
            title: request.title.trim().to_string(),
            description: request.description.clone(),
            location: request.location.clone(),
            event_type: request.event_type.clone(),
            start_time: request.start_time,
            created_by: request.user_id,
        });
        vec![
            RoundEntityCreated {
                round: round.to_info(),
            }
            .into(),
        ]
    }

    pub(super) async fn on_entity_created(
        &self,
        guild_id: GuildId,
        created: &RoundEntityCreated,
    ) -> Vec<RoundEvent> {
        match self.store_new_round(guild_id, created.round.clone()).await {
            Ok(Some(round)) => vec![
                RoundCreated {
                    round: round.to_info(),
                }
                .into(),
            ],
            Ok(None) => Vec::new(),
            Err(e) => {
                e.report("create", created.round.id);
                vec![
                    RoundCreationFailed {
                        user_id: created.round.created_by,
                        title: created.round.title.clone(),
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    /// Returns `None` when the round was already stored by an earlier
    /// delivery of the same event.
    async fn store_new_round(
        &self,
        guild_id: GuildId,
        info: RoundInfo,
    ) -> Result<Option<Round>, HopError> {
        if info.guild_id != guild_id {
            return Err(HopError::GuildMismatch {
                expected: guild_id,
                actual: info.guild_id,
            });
        }
        let round = Round::try_from(info)?;
        if self.store.get_round(guild_id, round.id).await?.is_some() {
            debug!(round_id = %round.id, "Round already stored, skipping insert");
            return Ok(None);
        }
        self.store.insert_round(&round).await?;
        info!(
            guild_id = %guild_id,
            round_id = %round.id,
            created_by = %round.created_by,
            "Round created"
        );
        Ok(Some(round))
    }

    pub(super) async fn on_update_requested(
        &self,
        guild_id: GuildId,
        request: &RoundUpdateRequested,
    ) -> Vec<RoundEvent> {
        match self.edit_round(guild_id, request).await {
            Ok(round) => vec![
                RoundUpdated {
                    round: round.to_info(),
                }
                .into(),
            ],
            Err(e) => {
                e.report("update", request.round_id);
                vec![
                    RoundUpdateError {
                        request: request.clone(),
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    async fn edit_round(
        &self,
        guild_id: GuildId,
        request: &RoundUpdateRequested,
    ) -> Result<Round, HopError> {
        // These two must fail before the store is touched.
        if request.round_id.is_nil() {
            return Err(HopError::MissingRoundId);
        }
        if !request.has_changes() {
            return Err(HopError::NoChanges);
        }
        let errors = validate_edit(request, unix_now());
        if !errors.is_empty() {
            return Err(HopError::Invalid(errors.join("; ")));
        }

        let round = self.load(guild_id, request.round_id).await?;
        self.authorize(&round, request.user_id, "edit").await?;
        let edit = RoundEdit {
            title: request.title.as_deref().map(|t| t.trim().to_string()),
            description: request.description.clone(),
            location: request.location.clone(),
            start_time: request.start_time,
            event_type: request.event_type.clone(),
        };
        let (round, _) = self
            .commit(round, |round| {
                round.apply_edit(edit.clone())?;
                Ok(true)
            })
            .await?;
        info!(round_id = %round.id, user_id = %request.user_id, "Round updated");
        Ok(round)
    }

    pub(super) async fn on_delete_requested(
        &self,
        guild_id: GuildId,
        request: &RoundDeleteRequested,
    ) -> Vec<RoundEvent> {
        match self.delete_round(guild_id, request).await {
            Ok(round_id) => vec![RoundDeleted { round_id }.into()],
            Err(e) => {
                e.report("delete", request.round_id);
                vec![
                    RoundDeleteError {
                        request: request.clone(),
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    async fn delete_round(
        &self,
        guild_id: GuildId,
        request: &RoundDeleteRequested,
    ) -> Result<RoundId, HopError> {
        if request.round_id.is_nil() {
            return Err(HopError::MissingRoundId);
        }
        let round = self.load(guild_id, request.round_id).await?;
        self.authorize(&round, request.user_id, "delete").await?;
        if !self.store.delete_round(guild_id, round.id).await? {
            return Err(HopError::RoundNotFound(round.id));
        }
        info!(round_id = %round.id, user_id = %request.user_id, "Round deleted");
        Ok(round.id)
    }

    pub(super) async fn on_start_requested(
        &self,
        guild_id: GuildId,
        request: &RoundStartRequested,
    ) -> Vec<RoundEvent> {
        match self.start_round(guild_id, request.round_id).await {
            Ok(Some(round)) => vec![
                RoundStarted {
                    round: round.to_info(),
                }
                .into(),
            ],
            Ok(None) => Vec::new(),
            Err(e) => {
                e.report("start", request.round_id);
                vec![
                    RoundStartFailed {
                        round_id: request.round_id,
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    async fn start_round(
        &self,
        guild_id: GuildId,
        round_id: RoundId,
    ) -> Result<Option<Round>, HopError> {
        let round = self.load(guild_id, round_id).await?;
        let (round, started) = self
            .commit(round, |round| match round.start() {
                Ok(()) => Ok(true),
                Err(RoundError::AlreadyInState(RoundState::InProgress)) => Ok(false),
                Err(e) => Err(e.into()),
            })
            .await?;
        if !started {
            debug!(round_id = %round_id, "Round already started");
            return Ok(None);
        }
        info!(round_id = %round_id, "Round started");
        Ok(Some(round))
    }
}
