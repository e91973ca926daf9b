//! The Round aggregate.
//!
//! Pure data plus transition rules, no I/O. State and participants are
//! private so the invariants below can only be changed through the
//! transition methods:
//!
//! - `finalized == true` iff `state == Finalized`
//! - state only moves forward: `Upcoming -> InProgress -> Finalized`
//! - a user appears at most once in `participants`

use fairway_sdk::objects::{
    GuildId, Participant, ParticipantScore, RoundId, RoundInfo, RoundState, TagNumber,
    TeamGrouping, UserId,
};
use thiserror::Error;

/// Errors raised by aggregate transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoundError {
    #[error("cannot move round from {from} to {to}")]
    InvalidTransition { from: RoundState, to: RoundState },

    #[error("round is already {0}")]
    AlreadyInState(RoundState),

    #[error("round is finalized")]
    Finalized,

    #[error("participant {0} not found in round")]
    ParticipantNotFound(UserId),

    #[error("inconsistent round: {0}")]
    Inconsistent(String),
}

/// Editable round fields. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: Option<i64>,
    pub event_type: Option<String>,
}

/// Data needed to create a new round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRound {
    pub guild_id: GuildId,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub event_type: Option<String>,
    pub start_time: Option<i64>,
    pub created_by: UserId,
}

/// Whether an add created a new entry or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub id: RoundId,
    pub guild_id: GuildId,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub event_type: Option<String>,
    pub start_time: Option<i64>,
    pub created_by: UserId,
    pub teams: Vec<TeamGrouping>,
    state: RoundState,
    finalized: bool,
    participants: Vec<Participant>,
    version: i64,
}

impl Round {
    /// Create a fresh `Upcoming` round with no participants.
    pub fn new(new: NewRound) -> Self {
        Self {
            id: RoundId::new(),
            guild_id: new.guild_id,
            title: new.title,
            description: new.description,
            location: new.location,
            event_type: new.event_type,
            start_time: new.start_time,
            created_by: new.created_by,
            teams: Vec::new(),
            state: RoundState::Upcoming,
            finalized: false,
            participants: Vec::new(),
            version: 0,
        }
    }

    /// Store revision this copy was read at. Stores compare it on write.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub(crate) fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    fn participant_mut(&mut self, user_id: UserId) -> Result<&mut Participant, RoundError> {
        self.participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(RoundError::ParticipantNotFound(user_id))
    }

    fn ensure_mutable(&self) -> Result<(), RoundError> {
        if self.finalized {
            return Err(RoundError::Finalized);
        }
        Ok(())
    }

    /// `Upcoming -> InProgress`.
    pub fn start(&mut self) -> Result<(), RoundError> {
        match self.state {
            RoundState::Upcoming => {
                self.state = RoundState::InProgress;
                Ok(())
            }
            RoundState::InProgress => Err(RoundError::AlreadyInState(RoundState::InProgress)),
            RoundState::Finalized => Err(RoundError::InvalidTransition {
                from: RoundState::Finalized,
                to: RoundState::InProgress,
            }),
        }
    }

    /// `Upcoming | InProgress -> Finalized`. Terminal.
    pub fn finalize(&mut self) -> Result<(), RoundError> {
        if self.state == RoundState::Finalized {
            return Err(RoundError::AlreadyInState(RoundState::Finalized));
        }
        self.state = RoundState::Finalized;
        self.finalized = true;
        Ok(())
    }

    pub fn apply_edit(&mut self, edit: RoundEdit) -> Result<(), RoundError> {
        self.ensure_mutable()?;
        if let Some(title) = edit.title {
            self.title = title;
        }
        if let Some(description) = edit.description {
            self.description = Some(description);
        }
        if let Some(location) = edit.location {
            self.location = Some(location);
        }
        if let Some(start_time) = edit.start_time {
            self.start_time = Some(start_time);
        }
        if let Some(event_type) = edit.event_type {
            self.event_type = Some(event_type);
        }
        Ok(())
    }

    /// Add a participant, or update the existing entry for the same user.
    ///
    /// An existing score is kept. A `None` tag in `participant` keeps the
    /// stored tag.
    pub fn add_or_update_participant(
        &mut self,
        participant: Participant,
    ) -> Result<Upsert, RoundError> {
        self.ensure_mutable()?;
        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.user_id == participant.user_id)
        {
            existing.response = participant.response;
            if participant.tag_number.is_some() {
                existing.tag_number = participant.tag_number;
            }
            if participant.joined_late.is_some() {
                existing.joined_late = participant.joined_late;
            }
            return Ok(Upsert::Updated);
        }
        self.participants.push(participant);
        Ok(Upsert::Added)
    }

    pub fn remove_participant(&mut self, user_id: UserId) -> Result<Participant, RoundError> {
        self.ensure_mutable()?;
        let index = self
            .participants
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or(RoundError::ParticipantNotFound(user_id))?;
        Ok(self.participants.remove(index))
    }

    pub fn update_score(&mut self, user_id: UserId, score: i32) -> Result<(), RoundError> {
        self.ensure_mutable()?;
        self.participant_mut(user_id)?.score = Some(score);
        Ok(())
    }

    /// Returns `true` when the stored tag actually changed.
    pub fn update_tag(&mut self, user_id: UserId, tag: TagNumber) -> Result<bool, RoundError> {
        self.ensure_mutable()?;
        let participant = self.participant_mut(user_id)?;
        if participant.tag_number == Some(tag) {
            return Ok(false);
        }
        participant.tag_number = Some(tag);
        Ok(true)
    }

    /// Scores of participants expected to play, in join order.
    pub fn counted_scores(&self) -> Vec<ParticipantScore> {
        self.participants
            .iter()
            .filter(|p| p.response.is_counted())
            .filter_map(|p| {
                p.score.map(|score| ParticipantScore {
                    user_id: p.user_id,
                    score,
                    tag_number: p.tag_number,
                })
            })
            .collect()
    }

    pub fn to_info(&self) -> RoundInfo {
        RoundInfo {
            id: self.id,
            guild_id: self.guild_id,
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            event_type: self.event_type.clone(),
            start_time: self.start_time,
            state: self.state,
            finalized: self.finalized,
            created_by: self.created_by,
            participants: self.participants.clone(),
            teams: self.teams.clone(),
        }
    }
}

impl TryFrom<RoundInfo> for Round {
    type Error = RoundError;

    /// Rebuild an aggregate from a snapshot, rejecting snapshots that break
    /// the invariants.
    fn try_from(info: RoundInfo) -> Result<Self, Self::Error> {
        if info.finalized != (info.state == RoundState::Finalized) {
            return Err(RoundError::Inconsistent(format!(
                "finalized flag {} does not match state {}",
                info.finalized, info.state
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for participant in &info.participants {
            if !seen.insert(participant.user_id) {
                return Err(RoundError::Inconsistent(format!(
                    "participant {} appears more than once",
                    participant.user_id
                )));
            }
        }
        Ok(Self {
            id: info.id,
            guild_id: info.guild_id,
            title: info.title,
            description: info.description,
            location: info.location,
            event_type: info.event_type,
            start_time: info.start_time,
            created_by: info.created_by,
            teams: info.teams,
            state: info.state,
            finalized: info.finalized,
            participants: info.participants,
            version: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairway_sdk::objects::Response;
    use proptest::prelude::*;

    fn round() -> Round {
        Round::new(NewRound {
            guild_id: GuildId(1),
            title: "Sunday doubles".to_string(),
            description: None,
            location: Some("Riverside".to_string()),
            event_type: None,
            start_time: None,
            created_by: UserId(10),
        })
    }

    #[test]
    fn test_new_round_is_upcoming() {
        let round = round();
        assert_eq!(round.state(), RoundState::Upcoming);
        assert!(!round.is_finalized());
        assert!(!round.id.is_nil());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let mut round = round();
        round.start().unwrap();
        assert_eq!(round.start(), Err(RoundError::AlreadyInState(RoundState::InProgress)));
        round.finalize().unwrap();
        assert!(round.is_finalized());
        assert_eq!(
            round.start(),
            Err(RoundError::InvalidTransition {
                from: RoundState::Finalized,
                to: RoundState::InProgress,
            })
        );
        assert_eq!(round.finalize(), Err(RoundError::AlreadyInState(RoundState::Finalized)));
    }

    #[test]
    fn test_upsert_keeps_single_entry_and_score() {
        let mut round = round();
        let mut alice = Participant::new(UserId(1), Response::Accept);
        alice.tag_number = Some(TagNumber(4));
        assert_eq!(round.add_or_update_participant(alice), Ok(Upsert::Added));
        round.update_score(UserId(1), 3).unwrap();

        let again = Participant::new(UserId(1), Response::Tentative);
        assert_eq!(round.add_or_update_participant(again), Ok(Upsert::Updated));

        assert_eq!(round.participants().len(), 1);
        let alice = round.participant(UserId(1)).unwrap();
        assert_eq!(alice.response, Response::Tentative);
        assert_eq!(alice.score, Some(3));
        assert_eq!(alice.tag_number, Some(TagNumber(4)));
    }

    #[test]
    fn test_finalized_round_rejects_mutation() {
        let mut round = round();
        round
            .add_or_update_participant(Participant::new(UserId(1), Response::Accept))
            .unwrap();
        round.finalize().unwrap();
        assert_eq!(round.update_score(UserId(1), 2), Err(RoundError::Finalized));
        assert_eq!(round.update_tag(UserId(1), TagNumber(1)), Err(RoundError::Finalized));
        assert_eq!(round.remove_participant(UserId(1)), Err(RoundError::Finalized));
        assert_eq!(
            round.apply_edit(RoundEdit {
                title: Some("late".to_string()),
                ..Default::default()
            }),
            Err(RoundError::Finalized)
        );
    }

    #[test]
    fn test_update_tag_reports_change() {
        let mut round = round();
        round
            .add_or_update_participant(Participant::new(UserId(1), Response::Accept))
            .unwrap();
        assert_eq!(round.update_tag(UserId(1), TagNumber(9)), Ok(true));
        assert_eq!(round.update_tag(UserId(1), TagNumber(9)), Ok(false));
        assert_eq!(
            round.update_tag(UserId(2), TagNumber(9)),
            Err(RoundError::ParticipantNotFound(UserId(2)))
        );
    }

    #[test]
    fn test_counted_scores_skip_declines() {
        let mut round = round();
        round
            .add_or_update_participant(Participant::new(UserId(1), Response::Accept))
            .unwrap();
        round
            .add_or_update_participant(Participant::new(UserId(2), Response::Decline))
            .unwrap();
        round.update_score(UserId(1), -2).unwrap();
        round.update_score(UserId(2), 5).unwrap();
        let scores = round.counted_scores();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].user_id, UserId(1));
        assert_eq!(scores[0].score, -2);
    }

    #[test]
    fn test_snapshot_with_mismatched_flag_is_rejected() {
        let mut info = round().to_info();
        info.finalized = true;
        assert!(matches!(Round::try_from(info), Err(RoundError::Inconsistent(_))));
    }

    #[test]
    fn test_snapshot_with_duplicate_participant_is_rejected() {
        let mut info = round().to_info();
        info.participants = vec![
            Participant::new(UserId(1), Response::Accept),
            Participant::new(UserId(1), Response::Decline),
        ];
        assert!(matches!(Round::try_from(info), Err(RoundError::Inconsistent(_))));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start,
        Finalize,
        Join(u64, u8),
        Remove(u64),
        Score(u64, i32),
        Tag(u64, u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Start),
            Just(Op::Finalize),
            (0u64..5, 0u8..3).prop_map(|(u, r)| Op::Join(u, r)),
            (0u64..5).prop_map(Op::Remove),
            (0u64..5, -10i32..10).prop_map(|(u, s)| Op::Score(u, s)),
            (0u64..5, 1u32..20).prop_map(|(u, t)| Op::Tag(u, t)),
        ]
    }

    fn rank(state: RoundState) -> u8 {
        match state {
            RoundState::Upcoming => 0,
            RoundState::InProgress => 1,
            RoundState::Finalized => 2,
        }
    }

    proptest! {
        #[test]
        fn finalized_flag_tracks_state(ops in proptest::collection::vec(op(), 0..40)) {
            let mut round = round();
            let mut last_rank = rank(round.state());
            for op in ops {
                let response = |r: u8| match r {
                    0 => Response::Accept,
                    1 => Response::Tentative,
                    _ => Response::Decline,
                };
                let _ = match op {
                    Op::Start => round.start(),
                    Op::Finalize => round.finalize(),
                    Op::Join(u, r) => round
                        .add_or_update_participant(Participant::new(UserId(u), response(r)))
                        .map(|_| ()),
                    Op::Remove(u) => round.remove_participant(UserId(u)).map(|_| ()),
                    Op::Score(u, s) => round.update_score(UserId(u), s),
                    Op::Tag(u, t) => round.update_tag(UserId(u), TagNumber(t)).map(|_| ()),
                };
                prop_assert_eq!(round.is_finalized(), round.state() == RoundState::Finalized);
                prop_assert!(rank(round.state()) >= last_rank);
                last_rank = rank(round.state());

                let mut users: Vec<_> = round.participants().iter().map(|p| p.user_id).collect();
                let total = users.len();
                users.sort();
                users.dedup();
                prop_assert_eq!(users.len(), total);
            }
        }
    }
}
