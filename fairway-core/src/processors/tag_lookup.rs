//! TagLookupResponder processor.
//!
//! Stands in for the leaderboard module at the bus boundary: answers each
//! `TagLookupRequest` with a `TagLookupResult` read from the [`TagLedger`],
//! echoing the continuation fields unchanged.

use crate::entities::TagLedger;
use crate::processors::dispatcher::EventHandler;
use async_trait::async_trait;
use fairway_sdk::events::{
    Envelope, ParticipantJoinRequested, RoundEvent, RoundParticipantJoinError, TagLookupRequest,
    TagLookupResult,
};
use fairway_sdk::objects::GuildId;
use std::sync::Arc;
use tracing::{debug, error};

pub struct TagLookupResponder {
    ledger: Arc<dyn TagLedger>,
}

impl TagLookupResponder {
    pub fn new(ledger: Arc<dyn TagLedger>) -> Self {
        Self { ledger }
    }

    async fn lookup(&self, guild_id: GuildId, request: &TagLookupRequest) -> RoundEvent {
        match self.ledger.tag_of(guild_id, request.user_id).await {
            Ok(tag_number) => {
                debug!(
                    guild_id = %guild_id,
                    user_id = %request.user_id,
                    tag_number = ?tag_number,
                    "Tag lookup answered"
                );
                TagLookupResult {
                    round_id: request.round_id,
                    user_id: request.user_id,
                    tag_number,
                    original_response: request.original_response,
                    original_joined_late: request.original_joined_late,
                }
                .into()
            }
            Err(e) => {
                error!(
                    guild_id = %guild_id,
                    user_id = %request.user_id,
                    error = %e,
                    "Tag lookup failed"
                );
                RoundParticipantJoinError {
                    request: ParticipantJoinRequested {
                        round_id: request.round_id,
                        user_id: request.user_id,
                        response: request.original_response.as_str().to_string(),
                        joined_late: Some(request.original_joined_late),
                    },
                    reason: format!("tag lookup failed: {e}"),
                }
                .into()
            }
        }
    }
}

#[async_trait]
impl EventHandler for TagLookupResponder {
    fn name(&self) -> &'static str {
        "TagLookupResponder"
    }

    async fn handle(&self, envelope: &Envelope) -> Vec<Envelope> {
        match &envelope.event {
            RoundEvent::TagLookupRequest(request) => {
                let answer = self.lookup(envelope.guild_id, request).await;
                vec![envelope.follow_up(answer)]
            }
            _ => Vec::new(),
        }
    }
}
