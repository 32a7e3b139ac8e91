use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One answer unit in a session's response log. Order is significant and
/// duplicates by `question_id` are allowed; the log is never reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub question_id: String,
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Request origin captured for audit when a session completes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientMeta {
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

/// A client's continuous attempt at a quiz. `completed = true` is terminal
/// and reached at most once per `session_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_ref: Option<String>,
    pub quiz_id: Option<String>,
    pub responses: Vec<StepResponse>,
    pub steps_completed: i32,
    pub steps_total: Option<i32>,
    pub last_active_at: DateTime<Utc>,
    pub abandoned_at_step: Option<i32>,
    pub completed: bool,
    pub result: Option<serde_json::Value>,
    pub share_attempted: bool,
    pub share_attempted_at: Option<DateTime<Utc>>,
    pub client_meta: Option<ClientMeta>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            user_ref: None,
            quiz_id: None,
            responses: Vec::new(),
            steps_completed: 0,
            steps_total: None,
            last_active_at: now,
            abandoned_at_step: None,
            completed: false,
            result: None,
            share_attempted: false,
            share_attempted_at: None,
            client_meta: None,
        }
    }
}

/// Field-level patch merged onto a session by `SessionStore::upsert`.
/// `responses` replaces the stored log wholesale (full-snapshot overwrite);
/// absent fields leave the stored value untouched. Every upsert refreshes
/// `last_active_at` and clears `abandoned_at_step` (resuming un-abandons).
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub user_ref: Option<String>,
    pub quiz_id: Option<String>,
    pub responses: Option<Vec<StepResponse>>,
    pub steps_completed: Option<i32>,
    pub steps_total: Option<i32>,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Terminal record written exactly once per session id.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub session_id: String,
    pub quiz_id: Option<String>,
    pub responses: Vec<StepResponse>,
    pub result: Option<serde_json::Value>,
    pub client_meta: Option<ClientMeta>,
    pub completed_at: DateTime<Utc>,
}
