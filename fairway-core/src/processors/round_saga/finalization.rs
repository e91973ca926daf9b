use super::{HopError, RoundSaga};
use crate::entities::{Round, RoundError};
use fairway_sdk::events::{
    ProcessRoundScoresRequest, RoundEvent, RoundFinalizationFailed, RoundFinalized,
};
use fairway_sdk::objects::{GuildId, RoundId, RoundState};
use tracing::{debug, info};

impl RoundSaga {
    /// Shared by `AllScoresSubmitted` and `RoundFinalizeRequested`.
    ///
    /// A round that is already finalized produces nothing, so scores are
    /// forwarded to the scoring service once.
    pub(super) async fn finalize(&self, guild_id: GuildId, round_id: RoundId) -> Vec<RoundEvent> {
        match self.finalize_round(guild_id, round_id).await {
            Ok(Some(round)) => vec![
                RoundFinalized {
                    round: round.to_info(),
                }
                .into(),
                ProcessRoundScoresRequest {
                    round_id: round.id,
                    guild_id: round.guild_id,
                    scores: round.counted_scores(),
                }
                .into(),
            ],
            Ok(None) => Vec::new(),
            Err(e) => {
                e.report("finalize", round_id);
                vec![
                    RoundFinalizationFailed {
                        round_id,
                        reason: e.to_string(),
                    }
                    .into(),
                ]
            }
        }
    }

    async fn finalize_round(
        &self,
        guild_id: GuildId,
        round_id: RoundId,
    ) -> Result<Option<Round>, HopError> {
        let round = self.load(guild_id, round_id).await?;
        let (round, finalized) = self
            .commit(round, |round| match round.finalize() {
                Ok(()) => Ok(true),
                Err(RoundError::AlreadyInState(RoundState::Finalized)) => Ok(false),
                Err(e) => Err(e.into()),
            })
            .await?;
        if !finalized {
            debug!(round_id = %round_id, "Round already finalized");
            return Ok(None);
        }
        info!(
            round_id = %round_id,
            participants = round.participants().len(),
            "Round finalized"
        );
        Ok(Some(round))
    }
}
