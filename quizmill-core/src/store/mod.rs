//! Storage seams for the progression engine and engagement counters.
//!
//! Every method is a single atomic request against the backing store, so a
//! caller-side timeout can never leave the store half-written. The traits
//! are object-safe and injected once at process start (no process-global
//! clients).

pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QuizmillError;
use crate::models::{CompletionRecord, EngagementAction, Session, SessionPatch, StepResponse};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Which branch of a create-or-update write actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Whether a rating write inserted a new row or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingOutcome {
    Inserted,
    Replaced,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, QuizmillError>;

    /// Create-if-absent merge of `patch` onto the stored session. Clears
    /// `abandoned_at_step` and refreshes `last_active_at` on every call.
    async fn upsert(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<(Session, UpsertOutcome), QuizmillError>;

    /// Appends exactly one response to the existing log. `NotFound` if the
    /// session does not exist; no write is performed in that case.
    async fn append_response(
        &self,
        session_id: &str,
        response: StepResponse,
    ) -> Result<Session, QuizmillError>;

    /// Conditional terminal write: marks the session completed with the
    /// record's snapshot, creating the row if absent. A session that is
    /// already completed yields `Conflict` (exactly-once completion).
    async fn complete(&self, record: CompletionRecord) -> Result<Session, QuizmillError>;

    /// Sets `share_attempted` on an existing session. `NotFound` if absent.
    async fn mark_share_attempt(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Session, QuizmillError>;
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomic increment; the returned value is the post-increment total and
    /// must not lose updates under concurrent callers.
    async fn increment(&self, space: &str, key: &str, delta: i64) -> Result<i64, QuizmillError>;

    async fn get_all(&self, space: &str) -> Result<BTreeMap<String, i64>, QuizmillError>;
}

#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Single conditional write: sets the action's timestamp only if it is
    /// currently unset. Returns whether this call applied (first-write-wins).
    async fn set_if_unset(
        &self,
        recommendation_id: &str,
        action: EngagementAction,
        at: DateTime<Utc>,
    ) -> Result<bool, QuizmillError>;
}

#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Replace policy: a second rating from the same device overwrites the
    /// first instead of rejecting.
    async fn put(
        &self,
        quiz_id: &str,
        device_fingerprint: &str,
        rating: i32,
        at: DateTime<Utc>,
    ) -> Result<RatingOutcome, QuizmillError>;

    /// `(average, count)` over all ratings for the quiz; `(0.0, 0)` when
    /// there are none.
    async fn aggregate(&self, quiz_id: &str) -> Result<(f64, i64), QuizmillError>;

    async fn by_device(
        &self,
        quiz_id: &str,
        device_fingerprint: &str,
    ) -> Result<Option<i32>, QuizmillError>;
}
