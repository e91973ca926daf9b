//! Carry external tag changes into rounds that have not been played yet.
//!
//! Finalized rounds keep the tag each participant held when they played.
//! The hop always ends in one event: a summary naming the rounds it could
//! not write, or `ScheduledRoundTagUpdateFailed` when the affected rounds
//! could not even be looked up.

use super::RoundSaga;
use fairway_sdk::events::{
    RoundEvent, ScheduledRoundTagUpdate, ScheduledRoundTagUpdateFailed,
    TagsUpdatedForScheduledRounds,
};
use fairway_sdk::objects::GuildId;
use tracing::{error, info};

impl RoundSaga {
    pub(super) async fn on_tag_update(
        &self,
        guild_id: GuildId,
        update: &ScheduledRoundTagUpdate,
    ) -> Vec<RoundEvent> {
        let users: Vec<_> = update.changed_tags.keys().copied().collect();
        let rounds = if users.is_empty() {
            Vec::new()
        } else {
            match self.store.scheduled_rounds_with_users(guild_id, &users).await {
                Ok(rounds) => rounds,
                Err(e) => {
                    error!(
                        guild_id = %guild_id,
                        users = users.len(),
                        error = %e,
                        "Failed to load scheduled rounds for tag update"
                    );
                    return vec![
                        ScheduledRoundTagUpdateFailed {
                            changed_tags: update.changed_tags.clone(),
                            reason: e.to_string(),
                        }
                        .into(),
                    ];
                }
            }
        };

        let mut participants_updated = 0;
        let mut touched = Vec::new();
        let mut failed = Vec::new();
        for round in rounds {
            let round_id = round.id;
            let mut changed = 0;
            let written = self
                .commit(round, |round| {
                    changed = 0;
                    if round.is_finalized() {
                        return Ok(false);
                    }
                    for (user_id, tag) in &update.changed_tags {
                        if round.participant(*user_id).is_some()
                            && round.update_tag(*user_id, *tag)?
                        {
                            changed += 1;
                        }
                    }
                    Ok(changed > 0)
                })
                .await;
            match written {
                Ok((_, true)) => {
                    participants_updated += changed;
                    touched.push(round_id);
                }
                Ok((_, false)) => {}
                Err(e) => {
                    error!(round_id = %round_id, error = %e, "Failed to store updated tags");
                    failed.push(round_id);
                }
            }
        }

        info!(
            guild_id = %guild_id,
            participants_updated,
            rounds = touched.len(),
            failed = failed.len(),
            "Scheduled round tags updated"
        );
        vec![
            TagsUpdatedForScheduledRounds {
                participants_updated,
                rounds: touched,
                failed_rounds: failed,
            }
            .into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::super::RoundSaga;
    use super::super::test_support::*;
    use crate::config::{ConfigRoleAuthority, ConfigStore, GuildRoles};
    use crate::entities::{Round, RoundStore, StoreError};
    use crate::framework::MemoryProcessor;
    use async_trait::async_trait;
    use fairway_sdk::events::*;
    use fairway_sdk::objects::{GuildId, Response, RoundId, TagNumber, UserId};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Rounds from a [`MemoryProcessor`], with the lookup or the writes to
    /// one round failing.
    struct FaultyStore {
        inner: Arc<MemoryProcessor>,
        fail_lookup: bool,
        reject_writes_to: Option<RoundId>,
    }

    #[async_trait]
    impl RoundStore for FaultyStore {
        async fn get_round(
            &self,
            guild_id: GuildId,
            round_id: RoundId,
        ) -> Result<Option<Round>, StoreError> {
            self.inner.get_round(guild_id, round_id).await
        }

        async fn insert_round(&self, round: &Round) -> Result<(), StoreError> {
            self.inner.insert_round(round).await
        }

        async fn update_round(&self, round: &Round) -> Result<(), StoreError> {
            if self.reject_writes_to == Some(round.id) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.update_round(round).await
        }

        async fn delete_round(
            &self,
            guild_id: GuildId,
            round_id: RoundId,
        ) -> Result<bool, StoreError> {
            self.inner.delete_round(guild_id, round_id).await
        }

        async fn scheduled_rounds_with_users(
            &self,
            guild_id: GuildId,
            users: &[UserId],
        ) -> Result<Vec<Round>, StoreError> {
            if self.fail_lookup {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.scheduled_rounds_with_users(guild_id, users).await
        }
    }

    fn saga_over(store: FaultyStore) -> RoundSaga {
        let roles = Arc::new(ConfigRoleAuthority::new(ConfigStore::new(GuildRoles::default())));
        RoundSaga::new(Arc::new(store), roles)
    }

    fn tag_update() -> ScheduledRoundTagUpdate {
        ScheduledRoundTagUpdate {
            changed_tags: BTreeMap::from([(UserId(1), TagNumber(5))]),
        }
    }

    #[tokio::test]
    async fn test_failed_lookup_ends_in_failure_event() {
        let ctx = Context::new();
        let round = ctx.round_with(&[(1, Response::Accept, None)]).await;
        let saga = saga_over(FaultyStore {
            inner: ctx.store.clone(),
            fail_lookup: true,
            reject_writes_to: None,
        });

        let events = saga.dispatch(GUILD, &tag_update().into()).await;

        assert_eq!(events.len(), 1);
        let failed = find!(events, ScheduledRoundTagUpdateFailed);
        assert_eq!(failed.changed_tags, tag_update().changed_tags);
        assert!(failed.reason.contains("pool timed out"));
        let stored = ctx.stored(round.id).await.unwrap();
        assert_eq!(stored.participant(UserId(1)).unwrap().tag_number, None);
    }

    #[tokio::test]
    async fn test_failed_round_write_is_reported() {
        let ctx = Context::new();
        let healthy = ctx.round_with(&[(1, Response::Accept, None)]).await;
        let broken = ctx.round_with(&[(1, Response::Tentative, None)]).await;
        let saga = saga_over(FaultyStore {
            inner: ctx.store.clone(),
            fail_lookup: false,
            reject_writes_to: Some(broken.id),
        });

        let events = saga.dispatch(GUILD, &tag_update().into()).await;

        let summary = find!(events, TagsUpdatedForScheduledRounds);
        assert_eq!(summary.participants_updated, 1);
        assert_eq!(summary.rounds, vec![healthy.id]);
        assert_eq!(summary.failed_rounds, vec![broken.id]);
        let stored = ctx.stored(broken.id).await.unwrap();
        assert_eq!(stored.participant(UserId(1)).unwrap().tag_number, None);
    }

    #[tokio::test]
    async fn test_only_scheduled_rounds_are_updated() {
        let ctx = Context::new();
        let upcoming = ctx.round_with(&[(1, Response::Accept, None)]).await;
        let started = ctx
            .round_with(&[(1, Response::Accept, None), (2, Response::Tentative, None)])
            .await;
        ctx.drive(RoundStartRequested { round_id: started.id }).await;
        let finished = ctx.round_with(&[(1, Response::Accept, Some(4))]).await;
        ctx.drive(RoundFinalizeRequested { round_id: finished.id }).await;

        let events = ctx
            .drive(ScheduledRoundTagUpdate {
                changed_tags: BTreeMap::from([
                    (UserId(1), TagNumber(5)),
                    (UserId(2), TagNumber(6)),
                ]),
            })
            .await;

        let summary = find!(events, TagsUpdatedForScheduledRounds);
        assert_eq!(summary.participants_updated, 3);
        assert_eq!(summary.rounds.len(), 2);
        assert!(!summary.rounds.contains(&finished.id));

        let finished = ctx.stored(finished.id).await.unwrap();
        assert_eq!(finished.participant(UserId(1)).unwrap().tag_number, None);
        let upcoming = ctx.stored(upcoming.id).await.unwrap();
        assert_eq!(upcoming.participant(UserId(1)).unwrap().tag_number, Some(TagNumber(5)));
    }

    #[tokio::test]
    async fn test_unchanged_tags_are_not_counted() {
        let ctx = Context::new();
        ctx.round_with(&[(1, Response::Accept, None)]).await;
        let update = ScheduledRoundTagUpdate {
            changed_tags: BTreeMap::from([(UserId(1), TagNumber(5))]),
        };

        ctx.drive(update.clone()).await;
        let events = ctx.drive(update).await;

        let summary = find!(events, TagsUpdatedForScheduledRounds);
        assert_eq!(summary.participants_updated, 0);
        assert!(summary.rounds.is_empty());
        assert!(summary.failed_rounds.is_empty());
    }
}
