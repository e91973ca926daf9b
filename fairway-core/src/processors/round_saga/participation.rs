//! Joining and leaving a round.
//!
//! A join takes three hops: the request is validated, the user's tag is
//! looked up by the leaderboard module, then the participant is upserted
//! from the lookup result alone. Declines skip the lookup.

use super::{HopError, RoundSaga};
use crate::entities::{RoundError, Upsert};
use fairway_sdk::events::{
    ParticipantJoinRequested, ParticipantJoinValidationRequested, ParticipantJoined,
    ParticipantRemovalRequested, ParticipantRemoved, RoundEvent, RoundParticipantJoinError,
    RoundParticipantRemovalError, TagLookupRequest, TagLookupResult,
};
use fairway_sdk::objects::{
    GuildId, Participant, Response, RoundId, RoundState, TagNumber, UnknownResponse, UserId,
};
use tracing::{debug, info};

/// Everything needed to upsert a participant, rebuilt from whichever
/// payload carries it.
struct JoinIntent {
    round_id: RoundId,
    user_id: UserId,
    response: Response,
    tag_number: Option<TagNumber>,
    joined_late: bool,
}

impl JoinIntent {
    fn as_request(&self) -> ParticipantJoinRequested {
        ParticipantJoinRequested {
            round_id: self.round_id,
            user_id: self.user_id,
            response: self.response.as_str().to_string(),
            joined_late: Some(self.joined_late),
        }
    }
}

impl RoundSaga {
    pub(super) async fn on_join_requested(
        &self,
        guild_id: GuildId,
        request: &ParticipantJoinRequested,
    ) -> Vec<RoundEvent> {
        match self.validate_join(guild_id, request).await {
            Ok(next) => vec![next],
            Err(e) => {
                e.report("join", request.round_id);
                vec![
                    RoundParticipantJoinError {
                        request: request.clone(),
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    async fn validate_join(
        &self,
        guild_id: GuildId,
        request: &ParticipantJoinRequested,
    ) -> Result<RoundEvent, HopError> {
        if request.round_id.is_nil() {
            return Err(HopError::MissingRoundId);
        }
        let response: Response = request
            .response
            .parse()
            .map_err(|e: UnknownResponse| HopError::Invalid(e.to_string()))?;

        let round = self.load(guild_id, request.round_id).await?;
        if round.is_finalized() {
            return Err(RoundError::Finalized.into());
        }

        // Answering the same way twice withdraws the answer.
        if round
            .participant(request.user_id)
            .is_some_and(|p| p.response == response)
        {
            debug!(
                round_id = %round.id,
                user_id = %request.user_id,
                "Repeated response, toggling to removal"
            );
            return Ok(ParticipantRemovalRequested {
                round_id: round.id,
                user_id: request.user_id,
            }
            .into());
        }

        let joined_late = request
            .joined_late
            .unwrap_or(round.state() == RoundState::InProgress);
        Ok(ParticipantJoinValidationRequested {
            round_id: round.id,
            user_id: request.user_id,
            response,
            joined_late,
        }
        .into())
    }

    pub(super) async fn on_join_validated(
        &self,
        guild_id: GuildId,
        validated: &ParticipantJoinValidationRequested,
    ) -> Vec<RoundEvent> {
        if validated.response == Response::Decline {
            return self
                .apply_join(
                    guild_id,
                    JoinIntent {
                        round_id: validated.round_id,
                        user_id: validated.user_id,
                        response: validated.response,
                        tag_number: None,
                        joined_late: validated.joined_late,
                    },
                )
                .await;
        }

        vec![
            TagLookupRequest {
                round_id: validated.round_id,
                user_id: validated.user_id,
                original_response: validated.response,
                original_joined_late: validated.joined_late,
            }
            .into(),
        ]
    }

    pub(super) async fn on_tag_lookup_result(
        &self,
        guild_id: GuildId,
        result: &TagLookupResult,
    ) -> Vec<RoundEvent> {
        self.apply_join(
            guild_id,
            JoinIntent {
                round_id: result.round_id,
                user_id: result.user_id,
                response: result.original_response,
                tag_number: result.tag_number,
                joined_late: result.original_joined_late,
            },
        )
        .await
    }

    async fn apply_join(&self, guild_id: GuildId, intent: JoinIntent) -> Vec<RoundEvent> {
        match self.upsert_participant(guild_id, &intent).await {
            Ok(joined) => vec![joined.into()],
            Err(e) => {
                e.report("join", intent.round_id);
                vec![
                    RoundParticipantJoinError {
                        request: intent.as_request(),
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    /// Upsert, so a redelivered lookup result leaves a single entry.
    async fn upsert_participant(
        &self,
        guild_id: GuildId,
        intent: &JoinIntent,
    ) -> Result<ParticipantJoined, HopError> {
        let round = self.load(guild_id, intent.round_id).await?;
        let participant = Participant {
            user_id: intent.user_id,
            response: intent.response,
            tag_number: intent.tag_number,
            score: None,
            joined_late: Some(intent.joined_late),
        };
        let mut upsert = Upsert::Added;
        let (round, _) = self
            .commit(round, |round| {
                upsert = round.add_or_update_participant(participant.clone())?;
                Ok(true)
            })
            .await?;

        info!(
            round_id = %round.id,
            user_id = %intent.user_id,
            response = %intent.response,
            upsert = ?upsert,
            "Participant joined"
        );
        let tag_number = round
            .participant(intent.user_id)
            .and_then(|p| p.tag_number);
        Ok(ParticipantJoined {
            round_id: round.id,
            user_id: intent.user_id,
            response: intent.response,
            tag_number,
            joined_late: intent.joined_late,
            participants: round.participants().to_vec(),
        })
    }

    pub(super) async fn on_removal_requested(
        &self,
        guild_id: GuildId,
        request: &ParticipantRemovalRequested,
    ) -> Vec<RoundEvent> {
        match self.remove_participant(guild_id, request).await {
            Ok(removed) => vec![removed.into()],
            Err(e) => {
                e.report("remove", request.round_id);
                vec![
                    RoundParticipantRemovalError {
                        request: request.clone(),
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    async fn remove_participant(
        &self,
        guild_id: GuildId,
        request: &ParticipantRemovalRequested,
    ) -> Result<ParticipantRemoved, HopError> {
        let round = self.load(guild_id, request.round_id).await?;
        let (round, _) = self
            .commit(round, |round| {
                round.remove_participant(request.user_id)?;
                Ok(true)
            })
            .await?;
        info!(round_id = %round.id, user_id = %request.user_id, "Participant removed");
        Ok(ParticipantRemoved {
            round_id: round.id,
            user_id: request.user_id,
            participants: round.participants().to_vec(),
        })
    }
}
