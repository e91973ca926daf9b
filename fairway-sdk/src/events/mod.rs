//! Round lifecycle events.
//!
//! Events travel as [`RawEnvelope`]s (JSON) and are decoded exactly once, at
//! the bus boundary, into an [`Envelope`] holding a [`RoundEvent`]. Handlers
//! dispatch by exhaustive `match` on the event; there is no string-keyed
//! routing past the decoder.
//!
//! # Event Flow
//!
//! 1. `ParticipantJoinRequested` -> `ParticipantJoinValidationRequested`
//! 2. `ParticipantJoinValidationRequested` -> `TagLookupRequest` (leaderboard)
//! 3. `TagLookupResult` (leaderboard) -> `ParticipantJoined`
//! 4. `ScoreUpdateRequested` -> `ScoreUpdateValidated` -> `ParticipantScoreUpdated`
//! 5. `ParticipantScoreUpdated` -> `AllScoresSubmitted` | `ScoresPartiallySubmitted`
//! 6. `AllScoresSubmitted` -> `RoundFinalized` + `ProcessRoundScoresRequest`
//!
//! Every follow-up event copies the correlation id and guild of the event
//! that caused it.

pub mod envelope;
pub mod payloads;

pub use envelope::{DecodeError, Envelope, EventKind, RawEnvelope, RoundEvent};
pub use payloads::*;
