//! Payload structs, one per event kind.
//!
//! Multi-hop flows carry their continuation state in these payloads
//! (`original_response`, `original_joined_late`, ...). Handlers keep nothing
//! in memory between hops.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::objects::{
    GuildId, Participant, ParticipantScore, Response, RoundId, RoundInfo, TagNumber, UserId,
};

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCreationRequested {
    pub user_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub event_type: Option<String>,
}

/// A validated round that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEntityCreated {
    pub round: RoundInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCreated {
    pub round: RoundInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundValidationFailed {
    pub user_id: UserId,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCreationFailed {
    pub user_id: UserId,
    pub title: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Editing and deletion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundUpdateRequested {
    pub round_id: RoundId,
    pub user_id: UserId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub event_type: Option<String>,
}

impl RoundUpdateRequested {
    /// Whether at least one editable field is present.
    pub fn has_changes(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.location.is_some()
            || self.start_time.is_some()
            || self.event_type.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundUpdated {
    pub round: RoundInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundUpdateError {
    pub request: RoundUpdateRequested,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDeleteRequested {
    pub round_id: RoundId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDeleted {
    pub round_id: RoundId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDeleteError {
    pub request: RoundDeleteRequested,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// Emitted by the external scheduler when a round's start time arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStartRequested {
    pub round_id: RoundId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStarted {
    pub round: RoundInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStartFailed {
    pub round_id: RoundId,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Joining and removal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantJoinRequested {
    pub round_id: RoundId,
    pub user_id: UserId,
    /// Raw response, validated by the saga.
    pub response: String,
    #[serde(default)]
    pub joined_late: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantJoinValidationRequested {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub response: Response,
    pub joined_late: bool,
}

/// Sent to the leaderboard module to resolve a user's current tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLookupRequest {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub original_response: Response,
    pub original_joined_late: bool,
}

/// The leaderboard module's answer to a [`TagLookupRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLookupResult {
    pub round_id: RoundId,
    pub user_id: UserId,
    #[serde(default)]
    pub tag_number: Option<TagNumber>,
    pub original_response: Response,
    pub original_joined_late: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantJoined {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub response: Response,
    pub tag_number: Option<TagNumber>,
    pub joined_late: bool,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundParticipantJoinError {
    pub request: ParticipantJoinRequested,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRemovalRequested {
    pub round_id: RoundId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRemoved {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundParticipantRemovalError {
    pub request: ParticipantRemovalRequested,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdateRequested {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdateValidated {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantScoreUpdated {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub score: i32,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundScoreUpdateError {
    pub request: ScoreUpdateRequested,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllScoresSubmitted {
    pub round_id: RoundId,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoresPartiallySubmitted {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub score: i32,
    pub missing_participant: UserId,
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundFinalizeRequested {
    pub round_id: RoundId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundFinalized {
    pub round: RoundInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundFinalizationFailed {
    pub round_id: RoundId,
    pub reason: String,
}

/// Forwarded to the scoring/ranking service once a round is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRoundScoresRequest {
    pub round_id: RoundId,
    pub guild_id: GuildId,
    pub scores: Vec<ParticipantScore>,
}

// ---------------------------------------------------------------------------
// Tag propagation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRoundTagUpdate {
    pub changed_tags: BTreeMap<UserId, TagNumber>,
}

/// Summary of a tag propagation. Rounds whose write failed are listed in
/// `failed_rounds` and are not counted in `participants_updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsUpdatedForScheduledRounds {
    pub participants_updated: usize,
    pub rounds: Vec<RoundId>,
    #[serde(default)]
    pub failed_rounds: Vec<RoundId>,
}

/// The affected rounds could not be looked up, so no tag was propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRoundTagUpdateFailed {
    pub changed_tags: BTreeMap<UserId, TagNumber>,
    pub reason: String,
}
