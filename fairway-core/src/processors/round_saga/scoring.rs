//! Score submission and quorum detection.

use super::{HopError, RoundSaga};
use crate::entities::RoundError;
use crate::utils::quorum::{Quorum, check_quorum};
use fairway_sdk::events::{
    AllScoresSubmitted, ParticipantScoreUpdated, RoundEvent, RoundScoreUpdateError,
    ScoreUpdateRequested, ScoreUpdateValidated, ScoresPartiallySubmitted,
};
use fairway_sdk::objects::GuildId;
use tracing::{debug, info};

impl RoundSaga {
    pub(super) async fn on_score_update_requested(
        &self,
        guild_id: GuildId,
        request: &ScoreUpdateRequested,
    ) -> Vec<RoundEvent> {
        match self.validate_score(guild_id, request).await {
            Ok(()) => vec![
                ScoreUpdateValidated {
                    round_id: request.round_id,
                    user_id: request.user_id,
                    score: request.score,
                }
                .into(),
            ],
            Err(e) => {
                e.report("score", request.round_id);
                vec![
                    RoundScoreUpdateError {
                        request: request.clone(),
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    async fn validate_score(
        &self,
        guild_id: GuildId,
        request: &ScoreUpdateRequested,
    ) -> Result<(), HopError> {
        if request.round_id.is_nil() {
            return Err(HopError::MissingRoundId);
        }
        let round = self.load(guild_id, request.round_id).await?;
        if round.is_finalized() {
            return Err(RoundError::Finalized.into());
        }
        if round.participant(request.user_id).is_none() {
            return Err(RoundError::ParticipantNotFound(request.user_id).into());
        }
        Ok(())
    }

    pub(super) async fn on_score_validated(
        &self,
        guild_id: GuildId,
        validated: &ScoreUpdateValidated,
    ) -> Vec<RoundEvent> {
        match self.apply_score(guild_id, validated).await {
            Ok(updated) => vec![updated.into()],
            Err(e) => {
                e.report("score", validated.round_id);
                vec![
                    RoundScoreUpdateError {
                        request: ScoreUpdateRequested {
                            round_id: validated.round_id,
                            user_id: validated.user_id,
                            score: validated.score,
                        },
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    /// Re-read and re-check: the round may have been finalized or the
    /// participant removed since validation.
    async fn apply_score(
        &self,
        guild_id: GuildId,
        validated: &ScoreUpdateValidated,
    ) -> Result<ParticipantScoreUpdated, HopError> {
        let round = self.load(guild_id, validated.round_id).await?;
        let (round, _) = self
            .commit(round, |round| {
                round.update_score(validated.user_id, validated.score)?;
                Ok(true)
            })
            .await?;
        debug!(
            round_id = %round.id,
            user_id = %validated.user_id,
            score = validated.score,
            "Score recorded"
        );
        Ok(ParticipantScoreUpdated {
            round_id: round.id,
            user_id: validated.user_id,
            score: validated.score,
            participants: round.participants().to_vec(),
        })
    }

    /// Quorum over the participant list as it stood right after this update.
    pub(super) fn on_score_updated(&self, updated: &ParticipantScoreUpdated) -> Vec<RoundEvent> {
        match check_quorum(&updated.participants) {
            Quorum::Complete => {
                info!(round_id = %updated.round_id, "All scores submitted");
                vec![
                    AllScoresSubmitted {
                        round_id: updated.round_id,
                        participants: updated.participants.clone(),
                    }
                    .into(),
                ]
            }
            Quorum::Missing(missing) => vec![
                ScoresPartiallySubmitted {
                    round_id: updated.round_id,
                    user_id: updated.user_id,
                    score: updated.score,
                    missing_participant: missing,
                }
                .into(),
            ],
        }
    }
}
