use crate::entities::round::Round;
use crate::entities::{LedgerError, RoundStore, StoreError, TagHolding, TagLedger};
use async_trait::async_trait;
use fairway_sdk::objects::{GuildId, RoundId, RoundState, TagNumber, UserId};
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Postgres-backed processor. Query structs in [`crate::entities`]
/// implement `kanau::processor::Processor` for it.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

/// In-memory stand-in for [`DatabaseProcessor`].
///
/// Implements the same seams with the same guild scoping, version checks
/// and tag uniqueness. Counts every store access so callers can assert
/// that validation happened first.
#[derive(Default)]
pub struct MemoryProcessor {
    rounds: RwLock<HashMap<(GuildId, RoundId), Round>>,
    tags: RwLock<HashMap<GuildId, BTreeMap<UserId, TagNumber>>>,
    store_calls: AtomicU64,
}

impl MemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [`RoundStore`] calls served so far.
    pub fn store_calls(&self) -> u64 {
        self.store_calls.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.store_calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl RoundStore for MemoryProcessor {
    async fn get_round(
        &self,
        guild_id: GuildId,
        round_id: RoundId,
    ) -> Result<Option<Round>, StoreError> {
        self.touch();
        Ok(self.rounds.read().await.get(&(guild_id, round_id)).cloned())
    }

    async fn insert_round(&self, round: &Round) -> Result<(), StoreError> {
        self.touch();
        self.rounds
            .write()
            .await
            .insert((round.guild_id, round.id), round.clone());
        Ok(())
    }

    async fn update_round(&self, round: &Round) -> Result<(), StoreError> {
        self.touch();
        let mut rounds = self.rounds.write().await;
        match rounds.get_mut(&(round.guild_id, round.id)) {
            Some(stored) if stored.version() != round.version() => {
                Err(StoreError::Conflict(round.id))
            }
            Some(stored) => {
                *stored = round.clone().with_version(round.version() + 1);
                Ok(())
            }
            None => Err(StoreError::NotFound(round.id)),
        }
    }

    async fn delete_round(&self, guild_id: GuildId, round_id: RoundId) -> Result<bool, StoreError> {
        self.touch();
        Ok(self.rounds.write().await.remove(&(guild_id, round_id)).is_some())
    }

    async fn scheduled_rounds_with_users(
        &self,
        guild_id: GuildId,
        users: &[UserId],
    ) -> Result<Vec<Round>, StoreError> {
        self.touch();
        let rounds = self.rounds.read().await;
        Ok(rounds
            .values()
            .filter(|r| r.guild_id == guild_id && r.state() != RoundState::Finalized)
            .filter(|r| users.iter().any(|u| r.participant(*u).is_some()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TagLedger for MemoryProcessor {
    async fn tag_of(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<TagNumber>, LedgerError> {
        let tags = self.tags.read().await;
        Ok(tags.get(&guild_id).and_then(|g| g.get(&user_id)).copied())
    }

    async fn claim_tag(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        tag: TagNumber,
    ) -> Result<bool, LedgerError> {
        let mut tags = self.tags.write().await;
        let guild = tags.entry(guild_id).or_default();
        if guild.iter().any(|(u, t)| *t == tag && *u != user_id) {
            return Ok(false);
        }
        guild.insert(user_id, tag);
        Ok(true)
    }

    async fn swap_tags(
        &self,
        guild_id: GuildId,
        a: TagHolding,
        b: TagHolding,
    ) -> Result<(), LedgerError> {
        let mut tags = self.tags.write().await;
        let guild = tags.entry(guild_id).or_default();
        for side in [a, b] {
            if guild.get(&side.user_id) != Some(&side.tag) {
                return Err(LedgerError::NotHeld {
                    user_id: side.user_id,
                    tag: side.tag,
                });
            }
        }
        guild.insert(a.user_id, b.tag);
        guild.insert(b.user_id, a.tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::round::NewRound;
    use fairway_sdk::objects::{Participant, Response};

    fn round(guild: u64) -> Round {
        Round::new(NewRound {
            guild_id: GuildId(guild),
            title: "Weekly".to_string(),
            description: None,
            location: None,
            event_type: None,
            start_time: None,
            created_by: UserId(1),
        })
    }

    #[tokio::test]
    async fn test_rounds_are_scoped_by_guild() {
        let store = MemoryProcessor::new();
        let round = round(1);
        store.insert_round(&round).await.unwrap();
        assert!(store.get_round(GuildId(1), round.id).await.unwrap().is_some());
        assert!(store.get_round(GuildId(2), round.id).await.unwrap().is_none());
        assert!(!store.delete_round(GuildId(2), round.id).await.unwrap());
        assert_eq!(store.store_calls(), 4);
    }

    #[tokio::test]
    async fn test_update_of_deleted_round_fails() {
        let store = MemoryProcessor::new();
        let round = round(1);
        assert!(matches!(
            store.update_round(&round).await,
            Err(StoreError::NotFound(id)) if id == round.id
        ));
    }

    #[tokio::test]
    async fn test_scheduled_rounds_skip_finalized() {
        let store = MemoryProcessor::new();
        let mut open = round(1);
        open.add_or_update_participant(Participant::new(UserId(5), Response::Accept))
            .unwrap();
        let mut done = round(1);
        done.add_or_update_participant(Participant::new(UserId(5), Response::Accept))
            .unwrap();
        done.finalize().unwrap();
        store.insert_round(&open).await.unwrap();
        store.insert_round(&done).await.unwrap();

        let found = store
            .scheduled_rounds_with_users(GuildId(1), &[UserId(5)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, open.id);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryProcessor::new();
        let round = round(1);
        store.insert_round(&round).await.unwrap();

        let mut first = store.get_round(GuildId(1), round.id).await.unwrap().unwrap();
        let mut second = first.clone();
        first
            .add_or_update_participant(Participant::new(UserId(2), Response::Accept))
            .unwrap();
        store.update_round(&first).await.unwrap();

        second.title = "Renamed".to_string();
        assert!(matches!(
            store.update_round(&second).await,
            Err(StoreError::Conflict(id)) if id == round.id
        ));
        let stored = store.get_round(GuildId(1), round.id).await.unwrap().unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(stored.title, "Weekly");
        assert!(stored.participant(UserId(2)).is_some());
    }

    #[tokio::test]
    async fn test_claim_tag_respects_holder() {
        let ledger = MemoryProcessor::new();
        let g = GuildId(1);
        assert!(ledger.claim_tag(g, UserId(1), TagNumber(5)).await.unwrap());
        assert!(!ledger.claim_tag(g, UserId(2), TagNumber(5)).await.unwrap());
        assert_eq!(ledger.tag_of(g, UserId(2)).await.unwrap(), None);

        assert!(ledger.claim_tag(g, UserId(1), TagNumber(7)).await.unwrap());
        assert!(ledger.claim_tag(g, UserId(2), TagNumber(5)).await.unwrap());
        assert_eq!(ledger.tag_of(g, UserId(1)).await.unwrap(), Some(TagNumber(7)));
    }

    #[tokio::test]
    async fn test_swap_tags_checks_expected_tags() {
        let ledger = MemoryProcessor::new();
        let g = GuildId(1);
        let holding = |user, tag| TagHolding {
            user_id: UserId(user),
            tag: TagNumber(tag),
        };
        ledger.claim_tag(g, UserId(1), TagNumber(5)).await.unwrap();
        ledger.claim_tag(g, UserId(2), TagNumber(9)).await.unwrap();

        ledger.swap_tags(g, holding(1, 5), holding(2, 9)).await.unwrap();
        assert_eq!(ledger.tag_of(g, UserId(1)).await.unwrap(), Some(TagNumber(9)));
        assert_eq!(ledger.tag_of(g, UserId(2)).await.unwrap(), Some(TagNumber(5)));

        assert!(matches!(
            ledger.swap_tags(g, holding(1, 9), holding(2, 9)).await,
            Err(LedgerError::NotHeld { user_id: UserId(2), tag: TagNumber(9) })
        ));
        assert!(matches!(
            ledger.swap_tags(g, holding(1, 9), holding(3, 1)).await,
            Err(LedgerError::NotHeld { user_id: UserId(3), .. })
        ));
        assert_eq!(ledger.tag_of(g, UserId(1)).await.unwrap(), Some(TagNumber(9)));
    }
}
