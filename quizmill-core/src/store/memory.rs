//! In-process store backend.
//!
//! Each structure sits behind its own `tokio::sync::Mutex`, so every trait
//! method is one critical section and the atomicity contract matches the
//! Postgres backend. Used by the test suite and as a standalone backend for
//! single-process deployments.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::QuizmillError;
use crate::models::{
    CompletionRecord, EngagementAction, Rating, RecommendationEngagement, Session, SessionPatch,
    StepResponse,
};
use crate::store::{
    CounterStore, EngagementStore, RatingOutcome, RatingStore, SessionStore, UpsertOutcome,
};

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    counters: Mutex<HashMap<(String, String), i64>>,
    engagement: Mutex<HashMap<String, RecommendationEngagement>>,
    ratings: Mutex<HashMap<(String, String), Rating>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(session: &mut Session, patch: SessionPatch) {
    if let Some(user_ref) = patch.user_ref {
        session.user_ref = Some(user_ref);
    }
    if let Some(quiz_id) = patch.quiz_id {
        session.quiz_id = Some(quiz_id);
    }
    if let Some(responses) = patch.responses {
        session.responses = responses;
    }
    if let Some(steps_completed) = patch.steps_completed {
        session.steps_completed = steps_completed;
    }
    if let Some(steps_total) = patch.steps_total {
        session.steps_total = Some(steps_total);
    }
    session.last_active_at = patch.last_active_at.unwrap_or_else(Utc::now);
    session.abandoned_at_step = None;
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, QuizmillError> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn upsert(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<(Session, UpsertOutcome), QuizmillError> {
        let mut sessions = self.sessions.lock().await;
        let outcome = if sessions.contains_key(session_id) {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        };
        let now = patch.last_active_at.unwrap_or_else(Utc::now);
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, now));
        apply_patch(entry, patch);
        Ok((entry.clone(), outcome))
    }

    async fn append_response(
        &self,
        session_id: &str,
        response: StepResponse,
    ) -> Result<Session, QuizmillError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| QuizmillError::NotFound(format!("session {session_id}")))?;
        session.last_active_at = response.timestamp;
        session.responses.push(response);
        Ok(session.clone())
    }

    async fn complete(&self, record: CompletionRecord) -> Result<Session, QuizmillError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .entry(record.session_id.clone())
            .or_insert_with(|| Session::new(&record.session_id, record.completed_at));
        if entry.completed {
            return Err(QuizmillError::Conflict(format!(
                "session {} already completed",
                record.session_id
            )));
        }
        entry.quiz_id = record.quiz_id;
        entry.steps_completed = record.responses.len() as i32;
        entry.responses = record.responses;
        entry.result = record.result;
        entry.client_meta = record.client_meta;
        entry.completed = true;
        entry.last_active_at = record.completed_at;
        entry.abandoned_at_step = None;
        Ok(entry.clone())
    }

    async fn mark_share_attempt(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Session, QuizmillError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| QuizmillError::NotFound(format!("session {session_id}")))?;
        session.share_attempted = true;
        session.share_attempted_at = Some(at);
        Ok(session.clone())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, space: &str, key: &str, delta: i64) -> Result<i64, QuizmillError> {
        let mut counters = self.counters.lock().await;
        let value = counters
            .entry((space.to_string(), key.to_string()))
            .or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn get_all(&self, space: &str) -> Result<BTreeMap<String, i64>, QuizmillError> {
        let counters = self.counters.lock().await;
        Ok(counters
            .iter()
            .filter(|((s, _), _)| s == space)
            .map(|((_, k), v)| (k.clone(), *v))
            .collect())
    }
}

#[async_trait]
impl EngagementStore for MemoryStore {
    async fn set_if_unset(
        &self,
        recommendation_id: &str,
        action: EngagementAction,
        at: DateTime<Utc>,
    ) -> Result<bool, QuizmillError> {
        let mut engagement = self.engagement.lock().await;
        let entry = engagement
            .entry(recommendation_id.to_string())
            .or_insert_with(|| RecommendationEngagement {
                recommendation_id: recommendation_id.to_string(),
                ..Default::default()
            });
        let slot = match action {
            EngagementAction::Viewed => &mut entry.viewed_at,
            EngagementAction::Clicked => &mut entry.clicked_at,
        };
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(at);
        Ok(true)
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn put(
        &self,
        quiz_id: &str,
        device_fingerprint: &str,
        rating: i32,
        at: DateTime<Utc>,
    ) -> Result<RatingOutcome, QuizmillError> {
        let mut ratings = self.ratings.lock().await;
        let prior = ratings.insert(
            (quiz_id.to_string(), device_fingerprint.to_string()),
            Rating {
                quiz_id: quiz_id.to_string(),
                device_fingerprint: device_fingerprint.to_string(),
                rating,
                rated_at: at,
            },
        );
        Ok(match prior {
            Some(_) => RatingOutcome::Replaced,
            None => RatingOutcome::Inserted,
        })
    }

    async fn aggregate(&self, quiz_id: &str) -> Result<(f64, i64), QuizmillError> {
        let ratings = self.ratings.lock().await;
        let mut sum = 0i64;
        let mut count = 0i64;
        for ((q, _), row) in ratings.iter() {
            if q == quiz_id {
                sum += i64::from(row.rating);
                count += 1;
            }
        }
        if count == 0 {
            return Ok((0.0, 0));
        }
        Ok((sum as f64 / count as f64, count))
    }

    async fn by_device(
        &self,
        quiz_id: &str,
        device_fingerprint: &str,
    ) -> Result<Option<i32>, QuizmillError> {
        let ratings = self.ratings.lock().await;
        Ok(ratings
            .get(&(quiz_id.to_string(), device_fingerprint.to_string()))
            .map(|row| row.rating))
    }
}
