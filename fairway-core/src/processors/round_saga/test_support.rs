//! Drives events through the saga synchronously, following every caused
//! event until the chain ends.

use super::RoundSaga;
use crate::config::{ConfigRoleAuthority, ConfigStore, GuildRoles};
use crate::entities::{NewRound, Round, RoundStore};
use crate::framework::MemoryProcessor;
use crate::processors::dispatcher::EventHandler;
use crate::processors::tag_lookup::TagLookupResponder;
use fairway_sdk::events::{Envelope, RoundEvent};
use fairway_sdk::objects::{GuildId, Participant, Response, RoundId, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub const GUILD: GuildId = GuildId(3);
pub const CREATOR: UserId = UserId(100);
pub const ADMIN: UserId = UserId(200);

macro_rules! find {
    ($events:expr, $variant:ident) => {
        $events
            .iter()
            .find_map(|e| match e {
                $crate::events::RoundEvent::$variant(payload) => Some(payload.clone()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no {} in {:?}", stringify!($variant), $events))
    };
}
pub(crate) use find;

pub struct Context {
    pub store: Arc<MemoryProcessor>,
    saga: RoundSaga,
    responder: TagLookupResponder,
}

impl Context {
    pub fn new() -> Self {
        let store = Arc::new(MemoryProcessor::new());
        let admins = HashMap::from([(GUILD, HashSet::from([ADMIN]))]);
        let roles = Arc::new(ConfigRoleAuthority::new(ConfigStore::new(GuildRoles::new(
            admins,
        ))));
        Self {
            saga: RoundSaga::new(store.clone(), roles),
            responder: TagLookupResponder::new(store.clone()),
            store,
        }
    }

    /// Every event of the chain, the originating one first. All of them
    /// must share its correlation id.
    pub async fn drive(&self, event: impl Into<RoundEvent>) -> Vec<RoundEvent> {
        let origin = Envelope::originate(GUILD, event);
        let correlation_id = origin.correlation_id;
        let mut queue = VecDeque::from([origin]);
        let mut seen = Vec::new();
        while let Some(envelope) = queue.pop_front() {
            assert_eq!(envelope.correlation_id, correlation_id);
            assert_eq!(envelope.guild_id, GUILD);
            queue.extend(self.saga.handle(&envelope).await);
            queue.extend(self.responder.handle(&envelope).await);
            seen.push(envelope.event);
        }
        seen
    }

    /// Store an `Upcoming` round created by [`CREATOR`] with the given
    /// `(user, response, score)` participants.
    pub async fn round_with(&self, participants: &[(u64, Response, Option<i32>)]) -> Round {
        let mut round = Round::new(NewRound {
            guild_id: GUILD,
            title: "Club night".to_string(),
            description: None,
            location: None,
            event_type: None,
            start_time: None,
            created_by: CREATOR,
        });
        for (user, response, score) in participants {
            round
                .add_or_update_participant(Participant::new(UserId(*user), *response))
                .unwrap();
            if let Some(score) = score {
                round.update_score(UserId(*user), *score).unwrap();
            }
        }
        self.store.insert_round(&round).await.unwrap();
        round
    }

    pub async fn stored(&self, round_id: RoundId) -> Option<Round> {
        self.store.get_round(GUILD, round_id).await.unwrap()
    }
}
