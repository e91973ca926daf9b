//! Postgres persistence for rounds.
//!
//! Participants and team groupings are stored as JSONB on the round row, so
//! every mutation rewrites the whole aggregate. Snowflake ids are stored as
//! `BIGINT`. The `version` column guards those rewrites: an update only
//! lands if the row is still at the version the aggregate was read at.

use crate::entities::round::Round;
use crate::entities::{RoundStore, StoreError};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use fairway_sdk::objects::{
    GuildId, Participant, RoundId, RoundInfo, RoundState, TeamGrouping, UserId,
};
use kanau::processor::Processor;
use sqlx::types::Json;
use uuid::Uuid;

/// A `rounds` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoundRecord {
    pub id: Uuid,
    pub guild_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub event_type: Option<String>,
    pub start_time: Option<i64>,
    pub state: String,
    pub finalized: bool,
    pub created_by: i64,
    pub participants: Json<Vec<Participant>>,
    pub teams: Json<Vec<TeamGrouping>>,
    pub version: i64,
}

impl From<&Round> for RoundRecord {
    fn from(round: &Round) -> Self {
        Self {
            id: round.id.0,
            guild_id: round.guild_id.0 as i64,
            title: round.title.clone(),
            description: round.description.clone(),
            location: round.location.clone(),
            event_type: round.event_type.clone(),
            start_time: round.start_time,
            state: round.state().as_str().to_string(),
            finalized: round.is_finalized(),
            created_by: round.created_by.0 as i64,
            participants: Json(round.participants().to_vec()),
            teams: Json(round.teams.clone()),
            version: round.version(),
        }
    }
}

impl TryFrom<RoundRecord> for Round {
    type Error = StoreError;

    fn try_from(record: RoundRecord) -> Result<Self, Self::Error> {
        let version = record.version;
        let round_id = RoundId(record.id);
        let state = RoundState::from_db(&record.state).ok_or_else(|| StoreError::Corrupt {
            round_id,
            reason: format!("unknown state {:?}", record.state),
        })?;
        let info = RoundInfo {
            id: round_id,
            guild_id: GuildId(record.guild_id as u64),
            title: record.title,
            description: record.description,
            location: record.location,
            event_type: record.event_type,
            start_time: record.start_time,
            state,
            finalized: record.finalized,
            created_by: UserId(record.created_by as u64),
            participants: record.participants.0,
            teams: record.teams.0,
        };
        Round::try_from(info)
            .map(|round| round.with_version(version))
            .map_err(|e| StoreError::Corrupt {
                round_id,
                reason: e.to_string(),
            })
    }
}

const ROUND_COLUMNS: &str = "id, guild_id, title, description, location, event_type, \
    start_time, state, finalized, created_by, participants, teams, version";

#[derive(Debug, Clone)]
/// Load one round, scoped by guild.
pub struct GetRoundRecord {
    pub guild_id: GuildId,
    pub round_id: RoundId,
}

impl Processor<GetRoundRecord> for DatabaseProcessor {
    type Output = Option<RoundRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetRoundRecord")]
    async fn process(&self, query: GetRoundRecord) -> Result<Option<RoundRecord>, sqlx::Error> {
        let sql = format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = $1 AND guild_id = $2");
        sqlx::query_as::<_, RoundRecord>(&sql)
            .bind(query.round_id.0)
            .bind(query.guild_id.0 as i64)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct InsertRoundRecord {
    pub record: RoundRecord,
}

impl Processor<InsertRoundRecord> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertRoundRecord")]
    async fn process(&self, insert: InsertRoundRecord) -> Result<(), sqlx::Error> {
        let r = insert.record;
        sqlx::query(
            r#"
            INSERT INTO rounds
                (id, guild_id, title, description, location, event_type,
                 start_time, state, finalized, created_by, participants, teams, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(r.id)
        .bind(r.guild_id)
        .bind(r.title)
        .bind(r.description)
        .bind(r.location)
        .bind(r.event_type)
        .bind(r.start_time)
        .bind(r.state)
        .bind(r.finalized)
        .bind(r.created_by)
        .bind(r.participants)
        .bind(r.teams)
        .bind(r.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Overwrite a round row that is still at `record.version` and bump the
/// version. Returns the number of rows touched (0 or 1).
pub struct UpdateRoundRecord {
    pub record: RoundRecord,
}

impl Processor<UpdateRoundRecord> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateRoundRecord")]
    async fn process(&self, update: UpdateRoundRecord) -> Result<u64, sqlx::Error> {
        let r = update.record;
        let result = sqlx::query(
            r#"
            UPDATE rounds SET
                title = $3,
                description = $4,
                location = $5,
                event_type = $6,
                start_time = $7,
                state = $8,
                finalized = $9,
                participants = $10,
                teams = $11,
                version = version + 1,
                updated_at = now()
            WHERE id = $1 AND guild_id = $2 AND version = $12
            "#,
        )
        .bind(r.id)
        .bind(r.guild_id)
        .bind(r.title)
        .bind(r.description)
        .bind(r.location)
        .bind(r.event_type)
        .bind(r.start_time)
        .bind(r.state)
        .bind(r.finalized)
        .bind(r.participants)
        .bind(r.teams)
        .bind(r.version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct DeleteRoundRecord {
    pub guild_id: GuildId,
    pub round_id: RoundId,
}

impl Processor<DeleteRoundRecord> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteRoundRecord")]
    async fn process(&self, delete: DeleteRoundRecord) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM rounds WHERE id = $1 AND guild_id = $2")
            .bind(delete.round_id.0)
            .bind(delete.guild_id.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Rounds that have not been finalized and contain at least one of `users`.
pub struct GetScheduledRoundRecordsWithUsers {
    pub guild_id: GuildId,
    pub users: Vec<UserId>,
}

impl Processor<GetScheduledRoundRecordsWithUsers> for DatabaseProcessor {
    type Output = Vec<RoundRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetScheduledRoundRecordsWithUsers")]
    async fn process(
        &self,
        query: GetScheduledRoundRecordsWithUsers,
    ) -> Result<Vec<RoundRecord>, sqlx::Error> {
        if query.users.is_empty() {
            return Ok(Vec::new());
        }
        let users: Vec<i64> = query.users.iter().map(|u| u.0 as i64).collect();
        let sql = format!(
            r#"
            SELECT {ROUND_COLUMNS} FROM rounds
            WHERE guild_id = $1
              AND state IN ('upcoming', 'in_progress')
              AND EXISTS (
                  SELECT 1 FROM jsonb_array_elements(participants) p
                  WHERE (p->>'user_id')::bigint = ANY($2)
              )
            "#
        );
        sqlx::query_as::<_, RoundRecord>(&sql)
            .bind(query.guild_id.0 as i64)
            .bind(users)
            .fetch_all(&self.pool)
            .await
    }
}

#[async_trait]
impl RoundStore for DatabaseProcessor {
    async fn get_round(
        &self,
        guild_id: GuildId,
        round_id: RoundId,
    ) -> Result<Option<Round>, StoreError> {
        self.process(GetRoundRecord { guild_id, round_id })
            .await?
            .map(Round::try_from)
            .transpose()
    }

    async fn insert_round(&self, round: &Round) -> Result<(), StoreError> {
        self.process(InsertRoundRecord {
            record: round.into(),
        })
        .await?;
        Ok(())
    }

    async fn update_round(&self, round: &Round) -> Result<(), StoreError> {
        let touched = self
            .process(UpdateRoundRecord {
                record: round.into(),
            })
            .await?;
        if touched > 0 {
            return Ok(());
        }
        let still_there = self
            .process(GetRoundRecord {
                guild_id: round.guild_id,
                round_id: round.id,
            })
            .await?
            .is_some();
        if still_there {
            Err(StoreError::Conflict(round.id))
        } else {
            Err(StoreError::NotFound(round.id))
        }
    }

    async fn delete_round(&self, guild_id: GuildId, round_id: RoundId) -> Result<bool, StoreError> {
        let deleted = self.process(DeleteRoundRecord { guild_id, round_id }).await?;
        Ok(deleted > 0)
    }

    async fn scheduled_rounds_with_users(
        &self,
        guild_id: GuildId,
        users: &[UserId],
    ) -> Result<Vec<Round>, StoreError> {
        self.process(GetScheduledRoundRecordsWithUsers {
            guild_id,
            users: users.to_vec(),
        })
        .await?
        .into_iter()
        .map(Round::try_from)
        .collect()
    }
}
