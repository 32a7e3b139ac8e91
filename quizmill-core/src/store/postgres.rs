//! PostgreSQL store backend.
//!
//! Every mutation is a single `INSERT ... ON CONFLICT` or conditional
//! `UPDATE`, so each trait call is one atomic statement: the counter
//! increment cannot lose updates, the write-once fields cannot be raced
//! past, and a second completion of the same session matches zero rows.
//! Create-vs-update detection on upserts uses the `(xmax = 0)` trick.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};

use crate::error::QuizmillError;
use crate::models::{
    ClientMeta, CompletionRecord, EngagementAction, Session, SessionPatch, StepResponse,
};
use crate::store::{
    CounterStore, EngagementStore, RatingOutcome, RatingStore, SessionStore, UpsertOutcome,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "session_id, user_ref, quiz_id, responses, steps_completed, \
     steps_total, last_active_at, abandoned_at_step, completed, result, \
     share_attempted, share_attempted_at, client_meta";

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    user_ref: Option<String>,
    quiz_id: Option<String>,
    responses: serde_json::Value,
    steps_completed: i32,
    steps_total: Option<i32>,
    last_active_at: DateTime<Utc>,
    abandoned_at_step: Option<i32>,
    completed: bool,
    result: Option<serde_json::Value>,
    share_attempted: bool,
    share_attempted_at: Option<DateTime<Utc>>,
    client_meta: Option<serde_json::Value>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, QuizmillError> {
        let responses: Vec<StepResponse> = serde_json::from_value(self.responses)
            .map_err(|e| QuizmillError::Storage(format!("corrupt responses payload: {e}")))?;
        let client_meta: Option<ClientMeta> = match self.client_meta {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| QuizmillError::Storage(format!("corrupt client meta: {e}")))?,
            ),
            None => None,
        };
        Ok(Session {
            session_id: self.session_id,
            user_ref: self.user_ref,
            quiz_id: self.quiz_id,
            responses,
            steps_completed: self.steps_completed,
            steps_total: self.steps_total,
            last_active_at: self.last_active_at,
            abandoned_at_step: self.abandoned_at_step,
            completed: self.completed,
            result: self.result,
            share_attempted: self.share_attempted,
            share_attempted_at: self.share_attempted_at,
            client_meta,
        })
    }
}

fn session_from_row(row: &PgRow) -> Result<Session, QuizmillError> {
    SessionRow::from_row(row)
        .map_err(QuizmillError::Database)?
        .into_session()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, QuizmillError> {
    serde_json::to_value(value)
        .map_err(|e| QuizmillError::Storage(format!("serialize payload: {e}")))
}

#[async_trait]
impl SessionStore for PgStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, QuizmillError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM quiz_sessions WHERE session_id = $1");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn upsert(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<(Session, UpsertOutcome), QuizmillError> {
        let responses = patch.responses.as_ref().map(to_json).transpose()?;
        let last_active_at = patch.last_active_at.unwrap_or_else(Utc::now);
        let sql = format!(
            "INSERT INTO quiz_sessions \
                 (session_id, user_ref, quiz_id, responses, steps_completed, steps_total, last_active_at) \
             VALUES ($1, $2, $3, COALESCE($4, '[]'::jsonb), COALESCE($5, 0), $6, $7) \
             ON CONFLICT (session_id) DO UPDATE SET \
                 user_ref = COALESCE($2, quiz_sessions.user_ref), \
                 quiz_id = COALESCE($3, quiz_sessions.quiz_id), \
                 responses = COALESCE($4, quiz_sessions.responses), \
                 steps_completed = COALESCE($5, quiz_sessions.steps_completed), \
                 steps_total = COALESCE($6, quiz_sessions.steps_total), \
                 last_active_at = $7, \
                 abandoned_at_step = NULL \
             RETURNING {SESSION_COLUMNS}, (xmax = 0) AS created"
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .bind(&patch.user_ref)
            .bind(&patch.quiz_id)
            .bind(responses)
            .bind(patch.steps_completed)
            .bind(patch.steps_total)
            .bind(last_active_at)
            .fetch_one(&self.pool)
            .await?;
        let created: bool = row.try_get("created")?;
        let outcome = if created {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        };
        Ok((session_from_row(&row)?, outcome))
    }

    async fn append_response(
        &self,
        session_id: &str,
        response: StepResponse,
    ) -> Result<Session, QuizmillError> {
        let appended = to_json(&json!([response]))?;
        let sql = format!(
            "UPDATE quiz_sessions \
             SET responses = responses || $2, last_active_at = $3 \
             WHERE session_id = $1 \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .bind(appended)
            .bind(response.timestamp)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QuizmillError::NotFound(format!("session {session_id}")))?;
        session_from_row(&row)
    }

    async fn complete(&self, record: CompletionRecord) -> Result<Session, QuizmillError> {
        let responses = to_json(&record.responses)?;
        let client_meta = record.client_meta.as_ref().map(to_json).transpose()?;
        let steps_completed = record.responses.len() as i32;
        let sql = format!(
            "INSERT INTO quiz_sessions \
                 (session_id, quiz_id, responses, steps_completed, last_active_at, completed, result, client_meta) \
             VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7) \
             ON CONFLICT (session_id) DO UPDATE SET \
                 quiz_id = $2, \
                 responses = $3, \
                 steps_completed = $4, \
                 last_active_at = $5, \
                 completed = TRUE, \
                 result = $6, \
                 client_meta = $7, \
                 abandoned_at_step = NULL \
             WHERE quiz_sessions.completed = FALSE \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&record.session_id)
            .bind(&record.quiz_id)
            .bind(responses)
            .bind(steps_completed)
            .bind(record.completed_at)
            .bind(&record.result)
            .bind(client_meta)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                QuizmillError::Conflict(format!(
                    "session {} already completed",
                    record.session_id
                ))
            })?;
        session_from_row(&row)
    }

    async fn mark_share_attempt(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Session, QuizmillError> {
        let sql = format!(
            "UPDATE quiz_sessions \
             SET share_attempted = TRUE, share_attempted_at = $2 \
             WHERE session_id = $1 \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QuizmillError::NotFound(format!("session {session_id}")))?;
        session_from_row(&row)
    }
}

#[async_trait]
impl CounterStore for PgStore {
    async fn increment(&self, space: &str, key: &str, delta: i64) -> Result<i64, QuizmillError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO reaction_counters (space, key, value) VALUES ($1, $2, $3) \
             ON CONFLICT (space, key) DO UPDATE \
                 SET value = reaction_counters.value + EXCLUDED.value \
             RETURNING value",
        )
        .bind(space)
        .bind(key)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn get_all(&self, space: &str) -> Result<BTreeMap<String, i64>, QuizmillError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT key, value FROM reaction_counters WHERE space = $1")
                .bind(space)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl EngagementStore for PgStore {
    async fn set_if_unset(
        &self,
        recommendation_id: &str,
        action: EngagementAction,
        at: DateTime<Utc>,
    ) -> Result<bool, QuizmillError> {
        // Column name comes from a closed enum, never from client input.
        let col = action.column();
        let sql = format!(
            "INSERT INTO recommendation_engagement (recommendation_id, {col}) VALUES ($1, $2) \
             ON CONFLICT (recommendation_id) DO UPDATE SET {col} = EXCLUDED.{col} \
             WHERE recommendation_engagement.{col} IS NULL \
             RETURNING recommendation_id"
        );
        let row = sqlx::query(&sql)
            .bind(recommendation_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RatingStore for PgStore {
    async fn put(
        &self,
        quiz_id: &str,
        device_fingerprint: &str,
        rating: i32,
        at: DateTime<Utc>,
    ) -> Result<RatingOutcome, QuizmillError> {
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO quiz_ratings (quiz_id, device_fingerprint, rating, rated_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (quiz_id, device_fingerprint) DO UPDATE \
                 SET rating = EXCLUDED.rating, rated_at = EXCLUDED.rated_at \
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(quiz_id)
        .bind(device_fingerprint)
        .bind(rating)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(if inserted {
            RatingOutcome::Inserted
        } else {
            RatingOutcome::Replaced
        })
    }

    async fn aggregate(&self, quiz_id: &str) -> Result<(f64, i64), QuizmillError> {
        let row: (f64, i64) = sqlx::query_as(
            "SELECT COALESCE(AVG(rating), 0)::float8, COUNT(*) \
             FROM quiz_ratings WHERE quiz_id = $1",
        )
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn by_device(
        &self,
        quiz_id: &str,
        device_fingerprint: &str,
    ) -> Result<Option<i32>, QuizmillError> {
        let rating = sqlx::query_scalar(
            "SELECT rating FROM quiz_ratings WHERE quiz_id = $1 AND device_fingerprint = $2",
        )
        .bind(quiz_id)
        .bind(device_fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rating)
    }
}
