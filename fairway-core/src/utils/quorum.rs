//! Score-submission quorum.
//!
//! Recomputed from the full participant list on every score update. Late
//! joins, removals and response changes all move the denominator, so no
//! running counter is kept anywhere.

use fairway_sdk::objects::{Participant, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
    /// Every counted participant has a score.
    Complete,
    /// At least this participant is still missing a score.
    Missing(UserId),
}

/// Counted participants are those whose response is not `Decline`. The
/// first counted participant without a score, in join order, is reported.
pub fn check_quorum(participants: &[Participant]) -> Quorum {
    participants
        .iter()
        .find(|p| p.response.is_counted() && p.score.is_none())
        .map_or(Quorum::Complete, |p| Quorum::Missing(p.user_id))
}
