//! Tag assignments owned by the leaderboard.
//!
//! The round lifecycle only needs lookup, claiming and exchange; ranking
//! lives in the scoring service.

use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use fairway_sdk::objects::{GuildId, TagNumber, UserId};
use kanau::processor::Processor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A swap side no longer holds the tag it was matched on
    #[error("user {user_id} does not hold tag {tag}")]
    NotHeld { user_id: UserId, tag: TagNumber },
}

/// One side of an exchange: the user and the tag they are expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHolding {
    pub user_id: UserId,
    pub tag: TagNumber,
}

#[async_trait]
pub trait TagLedger: Send + Sync {
    async fn tag_of(&self, guild_id: GuildId, user_id: UserId)
    -> Result<Option<TagNumber>, LedgerError>;

    /// Give `tag` to `user_id` unless another user already holds it.
    /// Whatever tag the user held before is released. Returns `false` and
    /// changes nothing when the tag is taken.
    async fn claim_tag(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        tag: TagNumber,
    ) -> Result<bool, LedgerError>;

    /// Exchange the tags of `a` and `b` in one step, provided both still
    /// hold the tags given. Otherwise nothing changes.
    async fn swap_tags(
        &self,
        guild_id: GuildId,
        a: TagHolding,
        b: TagHolding,
    ) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone)]
pub struct GetTagForUser {
    pub guild_id: GuildId,
    pub user_id: UserId,
}

impl Processor<GetTagForUser> for DatabaseProcessor {
    type Output = Option<TagNumber>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetTagForUser")]
    async fn process(&self, query: GetTagForUser) -> Result<Option<TagNumber>, sqlx::Error> {
        let tag: Option<i32> = sqlx::query_scalar(
            "SELECT tag_number FROM leaderboard_tags WHERE guild_id = $1 AND user_id = $2",
        )
        .bind(query.guild_id.0 as i64)
        .bind(query.user_id.0 as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tag.map(|t| TagNumber(t as u32)))
    }
}

#[derive(Debug, Clone)]
/// Insert or move a user's tag only while nobody else holds it.
///
/// Two concurrent claims on the same tag can both pass the `NOT EXISTS`
/// check; the unique constraint then rejects the second at commit, which
/// is reported as 0 rows.
pub struct ClaimTag {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub tag: TagNumber,
}

impl Processor<ClaimTag> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimTag")]
    async fn process(&self, claim: ClaimTag) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO leaderboard_tags (guild_id, user_id, tag_number)
            SELECT $1, $2, $3
            WHERE NOT EXISTS (
                SELECT 1 FROM leaderboard_tags
                WHERE guild_id = $1 AND tag_number = $3 AND user_id <> $2
            )
            ON CONFLICT (guild_id, user_id) DO UPDATE SET
                tag_number = EXCLUDED.tag_number,
                updated_at = now()
            "#,
        )
        .bind(claim.guild_id.0 as i64)
        .bind(claim.user_id.0 as i64)
        .bind(claim.tag.0 as i32)
        .execute(&self.pool)
        .await;
        match result {
            Ok(result) => Ok(result.rows_affected()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
/// Exchange two users' tags inside one transaction.
///
/// Each row is only touched while it still carries the expected tag.
/// Relies on the `(guild_id, tag_number)` unique constraint being deferred
/// until commit. Returns the number of rows updated (2 on success).
pub struct SwapTags {
    pub guild_id: GuildId,
    pub a: TagHolding,
    pub b: TagHolding,
}

impl Processor<SwapTags> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:SwapTags")]
    async fn process(&self, swap: SwapTags) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE leaderboard_tags SET
                tag_number = CASE WHEN user_id = $2 THEN $5 ELSE $3 END,
                updated_at = now()
            WHERE guild_id = $1
              AND ((user_id = $2 AND tag_number = $3)
                OR (user_id = $4 AND tag_number = $5))
            "#,
        )
        .bind(swap.guild_id.0 as i64)
        .bind(swap.a.user_id.0 as i64)
        .bind(swap.a.tag.0 as i32)
        .bind(swap.b.user_id.0 as i64)
        .bind(swap.b.tag.0 as i32)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 2 {
            tx.rollback().await?;
            return Ok(result.rows_affected());
        }
        tx.commit().await?;
        Ok(2)
    }
}

#[async_trait]
impl TagLedger for DatabaseProcessor {
    async fn tag_of(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<TagNumber>, LedgerError> {
        Ok(self.process(GetTagForUser { guild_id, user_id }).await?)
    }

    async fn claim_tag(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        tag: TagNumber,
    ) -> Result<bool, LedgerError> {
        let claimed = self.process(ClaimTag { guild_id, user_id, tag }).await?;
        Ok(claimed > 0)
    }

    async fn swap_tags(
        &self,
        guild_id: GuildId,
        a: TagHolding,
        b: TagHolding,
    ) -> Result<(), LedgerError> {
        let updated = self.process(SwapTags { guild_id, a, b }).await?;
        if updated != 2 {
            let user_id = a.user_id;
            let stale = match self.process(GetTagForUser { guild_id, user_id }).await? {
                Some(tag) if tag == a.tag => b,
                _ => a,
            };
            return Err(LedgerError::NotHeld {
                user_id: stale.user_id,
                tag: stale.tag,
            });
        }
        Ok(())
    }
}
