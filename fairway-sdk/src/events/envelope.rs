//! The event envelope and the closed set of event kinds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payloads::*;
use crate::objects::GuildId;

/// Errors raised while turning bytes into an [`Envelope`].
///
/// These are transport-class failures: the bus redelivers the message
/// instead of converting it into a business event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    #[error("unsupported version {version} for event {event}")]
    UnsupportedVersion { event: &'static str, version: u16 },
    #[error("invalid payload for event {event}: {source}")]
    Payload {
        event: &'static str,
        source: serde_json::Error,
    },
}

macro_rules! round_events {
    ($($variant:ident => $name:literal, version $version:literal;)*) => {
        /// Every event kind known to the round lifecycle.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($variant,)*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant,)*];

            /// Stable dotted wire name.
            pub fn name(&self) -> &'static str {
                match self {
                    $(EventKind::$variant => $name,)*
                }
            }

            /// Current payload version.
            pub fn version(&self) -> u16 {
                match self {
                    $(EventKind::$variant => $version,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(EventKind::$variant),)*
                    _ => None,
                }
            }
        }

        /// A decoded event. Closed: adding a kind forces every `match` to
        /// handle it.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum RoundEvent {
            $($variant($variant),)*
        }

        impl RoundEvent {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(RoundEvent::$variant(_) => EventKind::$variant,)*
                }
            }

            fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
                match self {
                    $(RoundEvent::$variant(payload) => serde_json::to_value(payload),)*
                }
            }

            fn from_payload(
                kind: EventKind,
                payload: serde_json::Value,
            ) -> Result<Self, serde_json::Error> {
                match kind {
                    $(EventKind::$variant => serde_json::from_value(payload).map(RoundEvent::$variant),)*
                }
            }
        }

        $(
            impl From<$variant> for RoundEvent {
                fn from(payload: $variant) -> Self {
                    RoundEvent::$variant(payload)
                }
            }
        )*
    };
}

round_events! {
    RoundCreationRequested => "round.creation.requested", version 1;
    RoundEntityCreated => "round.entity.created", version 1;
    RoundCreated => "round.created", version 1;
    RoundValidationFailed => "round.validation.failed", version 1;
    RoundCreationFailed => "round.creation.failed", version 1;
    RoundUpdateRequested => "round.update.requested", version 1;
    RoundUpdated => "round.updated", version 1;
    RoundUpdateError => "round.update.error", version 1;
    RoundDeleteRequested => "round.delete.requested", version 1;
    RoundDeleted => "round.deleted", version 1;
    RoundDeleteError => "round.delete.error", version 1;
    RoundStartRequested => "round.start.requested", version 1;
    RoundStarted => "round.started", version 1;
    RoundStartFailed => "round.start.failed", version 1;
    ParticipantJoinRequested => "round.participant.join.requested", version 1;
    ParticipantJoinValidationRequested => "round.participant.join.validation.requested", version 1;
    TagLookupRequest => "leaderboard.tag.lookup.requested", version 1;
    TagLookupResult => "leaderboard.tag.lookup.result", version 1;
    ParticipantJoined => "round.participant.joined", version 1;
    RoundParticipantJoinError => "round.participant.join.error", version 1;
    ParticipantRemovalRequested => "round.participant.removal.requested", version 1;
    ParticipantRemoved => "round.participant.removed", version 1;
    RoundParticipantRemovalError => "round.participant.removal.error", version 1;
    ScoreUpdateRequested => "round.score.update.requested", version 1;
    ScoreUpdateValidated => "round.score.update.validated", version 1;
    ParticipantScoreUpdated => "round.participant.score.updated", version 1;
    RoundScoreUpdateError => "round.score.update.error", version 1;
    AllScoresSubmitted => "round.scores.all.submitted", version 1;
    ScoresPartiallySubmitted => "round.scores.partially.submitted", version 1;
    RoundFinalizeRequested => "round.finalize.requested", version 1;
    RoundFinalized => "round.finalized", version 1;
    RoundFinalizationFailed => "round.finalization.failed", version 1;
    ProcessRoundScoresRequest => "score.process.round.requested", version 1;
    ScheduledRoundTagUpdate => "round.scheduled.tag.update", version 1;
    TagsUpdatedForScheduledRounds => "round.scheduled.tags.updated", version 1;
    ScheduledRoundTagUpdateFailed => "round.scheduled.tags.update.failed", version 1;
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.name(), self.version())
    }
}

/// The envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub correlation_id: Uuid,
    pub guild_id: GuildId,
    pub event: String,
    pub version: u16,
    pub payload: serde_json::Value,
    pub emitted_at: i64,
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub correlation_id: Uuid,
    pub guild_id: GuildId,
    pub emitted_at: i64,
    pub event: RoundEvent,
}

impl Envelope {
    /// Start a new correlation chain.
    pub fn originate(guild_id: GuildId, event: impl Into<RoundEvent>) -> Self {
        Self {
            correlation_id: Uuid::now_v7(),
            guild_id,
            emitted_at: now_unix(),
            event: event.into(),
        }
    }

    /// Build an event caused by this one. The correlation id and guild are
    /// copied verbatim.
    pub fn follow_up(&self, event: impl Into<RoundEvent>) -> Self {
        Self {
            correlation_id: self.correlation_id,
            guild_id: self.guild_id,
            emitted_at: now_unix(),
            event: event.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn to_raw(&self) -> Result<RawEnvelope, serde_json::Error> {
        let kind = self.kind();
        Ok(RawEnvelope {
            correlation_id: self.correlation_id,
            guild_id: self.guild_id,
            event: kind.name().to_string(),
            version: kind.version(),
            payload: self.event.payload_json()?,
            emitted_at: self.emitted_at,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_raw()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = DecodeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let kind =
            EventKind::from_name(&raw.event).ok_or(DecodeError::UnknownEvent(raw.event))?;
        if raw.version != kind.version() {
            return Err(DecodeError::UnsupportedVersion {
                event: kind.name(),
                version: raw.version,
            });
        }
        let event = RoundEvent::from_payload(kind, raw.payload).map_err(|source| {
            DecodeError::Payload {
                event: kind.name(),
                source,
            }
        })?;
        Ok(Self {
            correlation_id: raw.correlation_id,
            guild_id: raw.guild_id,
            emitted_at: raw.emitted_at,
            event,
        })
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
