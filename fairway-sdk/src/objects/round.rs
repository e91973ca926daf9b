//! Round and participant objects as they travel inside event payloads.
//!
//! These are the DTO versions. The aggregate with its transition rules
//! lives in `fairway-core::entities::round`.

use serde::{Deserialize, Serialize};

use super::ids::{GuildId, RoundId, TagNumber, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Upcoming,
    InProgress,
    Finalized,
}

impl RoundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundState::Upcoming => "upcoming",
            RoundState::InProgress => "in_progress",
            RoundState::Finalized => "finalized",
        }
    }

    /// Parse the storage representation produced by [`RoundState::as_str`].
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "upcoming" => Some(RoundState::Upcoming),
            "in_progress" => Some(RoundState::InProgress),
            "finalized" => Some(RoundState::Finalized),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's RSVP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Accept,
    Tentative,
    Decline,
}

impl Response {
    /// Whether a participant with this response is expected to submit a score.
    pub fn is_counted(&self) -> bool {
        !matches!(self, Response::Decline)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Response::Accept => "accept",
            Response::Tentative => "tentative",
            Response::Decline => "decline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid response {0:?}, expected one of accept, tentative, decline")]
pub struct UnknownResponse(pub String);

impl std::str::FromStr for Response {
    type Err = UnknownResponse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(Response::Accept),
            "tentative" => Ok(Response::Tentative),
            "decline" => Ok(Response::Decline),
            _ => Err(UnknownResponse(s.to_string())),
        }
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub response: Response,
    #[serde(default)]
    pub tag_number: Option<TagNumber>,
    #[serde(default)]
    pub score: Option<i32>,
    #[serde(default)]
    pub joined_late: Option<bool>,
}

impl Participant {
    pub fn new(user_id: UserId, response: Response) -> Self {
        Self {
            user_id,
            response,
            tag_number: None,
            score: None,
            joined_late: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamGrouping {
    pub name: String,
    pub members: Vec<UserId>,
}

/// Full snapshot of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub id: RoundId,
    pub guild_id: GuildId,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub event_type: Option<String>,
    /// Unix timestamp in seconds.
    pub start_time: Option<i64>,
    pub state: RoundState,
    pub finalized: bool,
    pub created_by: UserId,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub teams: Vec<TeamGrouping>,
}

/// A single score forwarded to the scoring service after finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantScore {
    pub user_id: UserId,
    pub score: i32,
    pub tag_number: Option<TagNumber>,
}
