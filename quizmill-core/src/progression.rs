//! Session progression engine.
//!
//! Orchestrates step recording, completion, and branch resolution over an
//! injected [`SessionStore`]. Every operation reloads state from the store;
//! the engine keeps no per-session state of its own, so any number of
//! engine instances can serve the same traffic.
//!
//! Session lifecycle: NEW -> IN_PROGRESS (save_step / record_response
//! loop) -> COMPLETED (terminal). Abandonment is marked by an external
//! janitor; the engine's only involvement is that every save clears
//! `abandoned_at_step`, so a returning client implicitly resumes.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::branch::BranchStrategy;
use crate::error::QuizmillError;
use crate::models::{ClientMeta, CompletionRecord, Session, SessionPatch, StepResponse};
use crate::store::{SessionStore, UpsertOutcome};

#[derive(Clone)]
pub struct ProgressionEngine {
    sessions: Arc<dyn SessionStore>,
    branch: Arc<dyn BranchStrategy>,
}

impl ProgressionEngine {
    pub fn new(sessions: Arc<dyn SessionStore>, branch: Arc<dyn BranchStrategy>) -> Self {
        Self { sessions, branch }
    }

    /// Full-snapshot save of the cumulative response sequence so far.
    /// Creates the session if absent (robust against client retries).
    ///
    /// `steps_completed` takes whatever `step_number` the client sends; an
    /// out-of-order retry of an earlier step regresses it. Last write wins,
    /// by contract: clients keep a single in-flight request per session.
    pub async fn save_step(
        &self,
        session_id: &str,
        responses: Vec<StepResponse>,
        step_number: i32,
        total_steps: Option<i32>,
    ) -> Result<(Session, UpsertOutcome), QuizmillError> {
        if session_id.trim().is_empty() {
            return Err(QuizmillError::Validation("sessionId is required".into()));
        }
        if step_number < 0 {
            return Err(QuizmillError::Validation(
                "stepNumber must be non-negative".into(),
            ));
        }
        let patch = SessionPatch {
            responses: Some(responses),
            steps_completed: Some(step_number),
            steps_total: total_steps,
            last_active_at: Some(Utc::now()),
            ..Default::default()
        };
        let (session, outcome) = self.sessions.upsert(session_id, patch).await?;
        tracing::debug!(
            session_id,
            step_number,
            ?outcome,
            "saved step snapshot"
        );
        Ok((session, outcome))
    }

    /// Append-only variant: adds exactly one response to an existing
    /// session. Absence is an error here, since the step ordering context
    /// would be unknown for a fresh row.
    pub async fn record_response(
        &self,
        session_id: &str,
        response: StepResponse,
    ) -> Result<Session, QuizmillError> {
        if session_id.trim().is_empty() {
            return Err(QuizmillError::Validation("sessionId is required".into()));
        }
        self.sessions.append_response(session_id, response).await
    }

    /// Writes the terminal completion record. Exactly-once per session id:
    /// a concurrent or retried duplicate gets `Conflict`.
    pub async fn complete(
        &self,
        session_id: &str,
        quiz_id: Option<String>,
        responses: Vec<StepResponse>,
        result: Option<serde_json::Value>,
        client_meta: Option<ClientMeta>,
    ) -> Result<Session, QuizmillError> {
        if session_id.trim().is_empty() {
            return Err(QuizmillError::Validation("sessionId is required".into()));
        }
        let record = CompletionRecord {
            session_id: session_id.to_string(),
            quiz_id,
            responses,
            result,
            client_meta,
            completed_at: Utc::now(),
        };
        let session = self.sessions.complete(record).await?;
        tracing::info!(session_id, steps = session.steps_completed, "session completed");
        Ok(session)
    }

    /// Decides where a branching question goes next based on free-text
    /// input. Empty or whitespace input always continues the default
    /// progression without consulting the strategy.
    pub async fn resolve_branch(
        &self,
        quiz_id: &str,
        question_id: &str,
        custom_input: &str,
    ) -> Result<Option<String>, QuizmillError> {
        if custom_input.trim().is_empty() {
            return Ok(None);
        }
        self.branch
            .next_question(quiz_id, question_id, custom_input)
            .await
    }

    /// Best-effort share annotation. `NotFound` when the session is absent;
    /// callers treat that as advisory rather than fatal.
    pub async fn log_share_attempt(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Session, QuizmillError> {
        if session_id.trim().is_empty() {
            return Err(QuizmillError::Validation("sessionId is required".into()));
        }
        self.sessions.mark_share_attempt(session_id, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::DefaultProgression;
    use crate::store::MemoryStore;

    fn engine() -> ProgressionEngine {
        ProgressionEngine::new(Arc::new(MemoryStore::new()), Arc::new(DefaultProgression))
    }

    fn response(question_id: &str) -> StepResponse {
        StepResponse {
            question_id: question_id.to_string(),
            value: serde_json::json!(1),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_step_creates_then_updates() {
        let engine = engine();
        let (session, outcome) = engine
            .save_step("s1", vec![response("q1")], 1, Some(5))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(session.steps_completed, 1);
        assert_eq!(session.steps_total, Some(5));

        let (session, outcome) = engine
            .save_step("s1", vec![response("q1"), response("q2")], 2, Some(5))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(session.steps_completed, 2);
        assert_eq!(session.responses.len(), 2);
    }

    #[tokio::test]
    async fn save_step_rejects_blank_session_id() {
        let engine = engine();
        let err = engine.save_step("  ", vec![], 1, None).await.unwrap_err();
        assert!(matches!(err, QuizmillError::Validation(_)));
    }

    #[tokio::test]
    async fn out_of_order_save_regresses_step_counter() {
        // Documented last-write-wins behavior, not a bug to fix.
        let engine = engine();
        engine
            .save_step("s1", vec![response("q1"), response("q2")], 2, Some(5))
            .await
            .unwrap();
        let (session, _) = engine
            .save_step("s1", vec![response("q1")], 1, Some(5))
            .await
            .unwrap();
        assert_eq!(session.steps_completed, 1);
        assert_eq!(session.responses.len(), 1);
    }

    #[tokio::test]
    async fn record_response_appends_to_existing_session() {
        let engine = engine();
        engine
            .save_step("s1", vec![response("q1")], 1, None)
            .await
            .unwrap();
        let session = engine.record_response("s1", response("q2")).await.unwrap();
        assert_eq!(session.responses.len(), 2);
        assert_eq!(session.responses[1].question_id, "q2");
    }

    #[tokio::test]
    async fn record_response_missing_session_is_not_found() {
        let engine = engine();
        let err = engine
            .record_response("ghost", response("q1"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuizmillError::NotFound(_)));
    }

    #[tokio::test]
    async fn complete_is_exactly_once() {
        let engine = engine();
        engine
            .save_step("s1", vec![response("q1")], 1, Some(2))
            .await
            .unwrap();

        let session = engine
            .complete(
                "s1",
                Some("quiz-a".to_string()),
                vec![response("q1"), response("q2")],
                Some(serde_json::json!({"archetype": "fox"})),
                Some(ClientMeta {
                    remote_addr: Some("203.0.113.9".to_string()),
                    user_agent: Some("test-agent".to_string()),
                }),
            )
            .await
            .unwrap();
        assert!(session.completed);
        assert_eq!(session.steps_completed, 2);
        assert!(session.client_meta.is_some());

        let err = engine
            .complete("s1", None, vec![], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, QuizmillError::Conflict(_)));
    }

    #[tokio::test]
    async fn resolve_branch_defaults_on_any_input() {
        let engine = engine();
        assert_eq!(
            engine.resolve_branch("quiz-a", "q3", "").await.unwrap(),
            None
        );
        assert_eq!(
            engine
                .resolve_branch("quiz-a", "q3", "surprise me")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn share_attempt_marks_existing_session() {
        let engine = engine();
        engine
            .save_step("s1", vec![response("q1")], 1, None)
            .await
            .unwrap();
        let at = Utc::now();
        let session = engine.log_share_attempt("s1", at).await.unwrap();
        assert!(session.share_attempted);
        assert_eq!(session.share_attempted_at, Some(at));

        let err = engine.log_share_attempt("ghost", at).await.unwrap_err();
        assert!(matches!(err, QuizmillError::NotFound(_)));
    }
}
