//! Quizmill HTTP REST API
//!
//! Axum-based HTTP server exposing the quiz progression engine and the
//! engagement counters.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! pure inner function. The inner functions are directly testable without
//! axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health                    — health check with store status
//! - GET  /version                   — server version info
//! - GET  /reactions                 — all reaction counters
//! - POST /reactions/vote            — atomic vote increment
//! - POST /quiz/save-step            — full-snapshot step save
//! - POST /quiz/record               — append one response
//! - POST /quiz/complete             — terminal completion record
//! - POST /quiz/log-share-attempt    — best-effort share annotation
//! - GET  /quiz/ratings/:quiz_id     — rating aggregate
//! - POST /quiz/ratings/:quiz_id     — submit/replace a device's rating
//! - POST /quiz/recommend/track      — write-once view/click tracking
//! - POST /quiz/analyze-custom-input — branch resolution for free text

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use quizmill_core::models::{ClientMeta, EngagementAction, StepResponse};
use quizmill_core::store::{
    CounterStore, EngagementStore, MemoryStore, PgStore, UpsertOutcome,
};
use quizmill_core::{DefaultProgression, ProgressionEngine, QuizmillError, RatingAggregator};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Named bucket holding the reaction counters.
pub const REACTIONS_SPACE: &str = "reactions";

/// Shared state for all HTTP handlers. Store clients are built once at
/// startup and injected; handlers never reach for process globals.
#[derive(Clone)]
pub struct HttpState {
    pub engine: ProgressionEngine,
    pub ratings: RatingAggregator,
    pub counters: Arc<dyn CounterStore>,
    pub engagement: Arc<dyn EngagementStore>,
    pub pool: Option<PgPool>,
}

impl HttpState {
    /// State backed by Postgres, the production configuration.
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        Self {
            engine: ProgressionEngine::new(store.clone(), Arc::new(DefaultProgression)),
            ratings: RatingAggregator::new(store.clone()),
            counters: store.clone(),
            engagement: store,
            pool: Some(pool),
        }
    }

    /// State backed by the in-process store. Used by the test suite and by
    /// single-process deployments with no external database.
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            engine: ProgressionEngine::new(store.clone(), Arc::new(DefaultProgression)),
            ratings: RatingAggregator::new(store.clone()),
            counters: store.clone(),
            engagement: store,
            pool: None,
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/reactions", get(reactions_handler))
        .route("/reactions/vote", post(vote_handler))
        .route("/quiz/save-step", post(save_step_handler))
        .route("/quiz/record", post(record_handler))
        .route("/quiz/complete", post(complete_handler))
        .route("/quiz/log-share-attempt", post(share_attempt_handler))
        .route(
            "/quiz/ratings/:quiz_id",
            get(ratings_get_handler).post(ratings_post_handler),
        )
        .route("/quiz/recommend/track", post(recommend_track_handler))
        .route("/quiz/analyze-custom-input", post(analyze_input_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    host: &str,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{host}:{port}");
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Quizmill HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub card_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStepRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub responses: Vec<StepResponse>,
    pub step_number: Option<i32>,
    pub total_steps: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    pub session_id: Option<String>,
    pub response: Option<StepResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub quiz_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub responses: Vec<StepResponse>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareAttemptRequest {
    pub quiz_id: Option<String>,
    pub personality_id: Option<String>,
    /// Epoch milliseconds; defaults to the server clock when absent.
    pub timestamp: Option<i64>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingsQuery {
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRatingRequest {
    pub device_fingerprint: Option<String>,
    pub rating: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub recommendation_id: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeInputRequest {
    pub quiz_id: Option<String>,
    pub question_id: Option<String>,
    pub custom_input: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Map a core error to a status + body. Validation problems surface their
/// message; storage failures are logged and returned as an opaque 500.
pub fn error_to_http(err: &QuizmillError) -> (StatusCode, serde_json::Value) {
    match err {
        QuizmillError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg}))
        }
        QuizmillError::NotFound(msg) => {
            (StatusCode::NOT_FOUND, serde_json::json!({"error": msg}))
        }
        QuizmillError::Conflict(msg) => {
            (StatusCode::CONFLICT, serde_json::json!({"error": msg}))
        }
        other => {
            tracing::error!("storage failure: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": "internal storage error"}),
            )
        }
    }
}

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg}))
}

fn required_str(field: Option<String>, name: &str) -> Result<String, (StatusCode, serde_json::Value)> {
    match field {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(bad_request(&format!("{name} is required"))),
    }
}

/// Audit metadata from request headers; every field is best-effort.
pub fn client_meta_from_headers(headers: &HeaderMap) -> ClientMeta {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    ClientMeta {
        remote_addr: header_str("x-forwarded-for")
            .map(|v| v.split(',').next().unwrap_or("").trim().to_string()),
        user_agent: header_str("user-agent"),
    }
}

fn timestamp_or_now(millis: Option<i64>) -> DateTime<Utc> {
    millis
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — reports the store backend and DB status.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    match &state.pool {
        Some(pool) => match quizmill_core::db::health_check(pool).await {
            Ok(ver) => (
                StatusCode::OK,
                serde_json::json!({
                    "status": "healthy",
                    "version": env!("CARGO_PKG_VERSION"),
                    "backend": "postgres",
                    "postgresql": ver,
                }),
            ),
            Err(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            ),
        },
        None => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "backend": "memory",
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "quizmill/1",
    })
}

/// Inner reactions listing — `{ cardId: count }` for the reactions space.
pub async fn reactions_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    match state.counters.get_all(REACTIONS_SPACE).await {
        Ok(counts) => (
            StatusCode::OK,
            serde_json::to_value(counts).unwrap_or_else(|_| serde_json::json!({})),
        ),
        Err(e) => error_to_http(&e),
    }
}

/// Inner vote — atomic increment for one card's counter.
pub async fn vote_inner(state: &HttpState, req: VoteRequest) -> (StatusCode, serde_json::Value) {
    let card_id = match required_str(req.card_id, "cardId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.counters.increment(REACTIONS_SPACE, &card_id, 1).await {
        Ok(count) => (
            StatusCode::OK,
            serde_json::json!({"cardId": card_id, "count": count}),
        ),
        Err(e) => error_to_http(&e),
    }
}

/// Inner save-step — create-if-absent snapshot save.
pub async fn save_step_inner(
    state: &HttpState,
    req: SaveStepRequest,
) -> (StatusCode, serde_json::Value) {
    let session_id = match required_str(req.session_id, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let step_number = match req.step_number {
        Some(n) => n,
        None => return bad_request("stepNumber is required"),
    };
    match state
        .engine
        .save_step(&session_id, req.responses, step_number, req.total_steps)
        .await
    {
        Ok((session, outcome)) => (
            StatusCode::OK,
            serde_json::json!({
                "success": true,
                "created": outcome == UpsertOutcome::Created,
                "stepsCompleted": session.steps_completed,
            }),
        ),
        Err(e) => error_to_http(&e),
    }
}

/// Inner record — append one response to an existing session.
pub async fn record_inner(
    state: &HttpState,
    req: RecordRequest,
) -> (StatusCode, serde_json::Value) {
    let session_id = match required_str(req.session_id, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let response = match req.response {
        Some(r) => r,
        None => return bad_request("response is required"),
    };
    match state.engine.record_response(&session_id, response).await {
        Ok(_) => (StatusCode::OK, serde_json::json!({"success": true})),
        Err(e) => error_to_http(&e),
    }
}

/// Inner complete — exactly-once terminal record with audit metadata.
pub async fn complete_inner(
    state: &HttpState,
    meta: ClientMeta,
    req: CompleteRequest,
) -> (StatusCode, serde_json::Value) {
    let session_id = match required_str(req.session_id, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state
        .engine
        .complete(&session_id, req.quiz_id, req.responses, req.result, Some(meta))
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            serde_json::json!({"success": true, "sessionId": session.session_id}),
        ),
        Err(e) => error_to_http(&e),
    }
}

/// Inner share attempt — advisory annotation; a missing session is a 404
/// the caller is free to ignore.
pub async fn share_attempt_inner(
    state: &HttpState,
    req: ShareAttemptRequest,
) -> (StatusCode, serde_json::Value) {
    let session_id = match required_str(req.session_id, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let at = timestamp_or_now(req.timestamp);
    match state.engine.log_share_attempt(&session_id, at).await {
        Ok(_) => (StatusCode::OK, serde_json::json!({"success": true})),
        Err(e @ QuizmillError::NotFound(_)) => {
            tracing::warn!(session_id, "share attempt for unknown session");
            error_to_http(&e)
        }
        Err(e) => error_to_http(&e),
    }
}

/// Inner ratings aggregate.
pub async fn ratings_get_inner(
    state: &HttpState,
    quiz_id: &str,
    device_fingerprint: Option<String>,
) -> (StatusCode, serde_json::Value) {
    match state
        .ratings
        .aggregate(quiz_id, device_fingerprint.as_deref())
        .await
    {
        Ok(summary) => (
            StatusCode::OK,
            serde_json::to_value(summary).unwrap_or_else(|_| serde_json::json!({})),
        ),
        Err(e) => error_to_http(&e),
    }
}

/// Inner rating submission — replace policy, returns the fresh aggregate.
pub async fn ratings_post_inner(
    state: &HttpState,
    quiz_id: &str,
    req: SubmitRatingRequest,
) -> (StatusCode, serde_json::Value) {
    let fingerprint = match required_str(req.device_fingerprint, "deviceFingerprint") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let rating = match req.rating {
        Some(r) => r,
        None => return bad_request("rating is required"),
    };
    if let Err(e) = state.ratings.submit(quiz_id, &fingerprint, rating).await {
        return error_to_http(&e);
    }
    match state.ratings.aggregate(quiz_id, Some(&fingerprint)).await {
        Ok(summary) => {
            let mut body = serde_json::to_value(summary).unwrap_or_else(|_| serde_json::json!({}));
            if let Some(obj) = body.as_object_mut() {
                obj.insert("success".to_string(), serde_json::json!(true));
            }
            (StatusCode::OK, body)
        }
        Err(e) => error_to_http(&e),
    }
}

/// Inner recommendation tracking — first-write-wins view/click stamps.
pub async fn recommend_track_inner(
    state: &HttpState,
    req: TrackRequest,
) -> (StatusCode, serde_json::Value) {
    let recommendation_id = match required_str(req.recommendation_id, "recommendationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let action = match req.action.as_deref().and_then(EngagementAction::parse) {
        Some(a) => a,
        None => return bad_request("action must be \"viewed\" or \"clicked\""),
    };
    match state
        .engagement
        .set_if_unset(&recommendation_id, action, Utc::now())
        .await
    {
        Ok(applied) => (
            StatusCode::OK,
            serde_json::json!({"success": true, "applied": applied}),
        ),
        Err(e) => error_to_http(&e),
    }
}

/// Inner custom-input analysis — resolves the branch for a free-text
/// answer. Null `nextQuestionId` means default linear progression.
pub async fn analyze_input_inner(
    state: &HttpState,
    req: AnalyzeInputRequest,
) -> (StatusCode, serde_json::Value) {
    let quiz_id = match required_str(req.quiz_id, "quizId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let question_id = match required_str(req.question_id, "questionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let custom_input = req.custom_input.unwrap_or_default();
    match state
        .engine
        .resolve_branch(&quiz_id, &question_id, &custom_input)
        .await
    {
        Ok(next) => (
            StatusCode::OK,
            serde_json::json!({"success": true, "nextQuestionId": next}),
        ),
        Err(e) => error_to_http(&e),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn reactions_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = reactions_inner(&state).await;
    (status, Json(body))
}

pub async fn vote_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<VoteRequest>,
) -> impl IntoResponse {
    let (status, body) = vote_inner(&state, req).await;
    (status, Json(body))
}

pub async fn save_step_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SaveStepRequest>,
) -> impl IntoResponse {
    let (status, body) = save_step_inner(&state, req).await;
    (status, Json(body))
}

pub async fn record_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<RecordRequest>,
) -> impl IntoResponse {
    let (status, body) = record_inner(&state, req).await;
    (status, Json(body))
}

pub async fn complete_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(req): Json<CompleteRequest>,
) -> impl IntoResponse {
    let meta = client_meta_from_headers(&headers);
    let (status, body) = complete_inner(&state, meta, req).await;
    (status, Json(body))
}

pub async fn share_attempt_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ShareAttemptRequest>,
) -> impl IntoResponse {
    let (status, body) = share_attempt_inner(&state, req).await;
    (status, Json(body))
}

pub async fn ratings_get_handler(
    State(state): State<Arc<HttpState>>,
    Path(quiz_id): Path<String>,
    Query(query): Query<RatingsQuery>,
) -> impl IntoResponse {
    let (status, body) = ratings_get_inner(&state, &quiz_id, query.device_fingerprint).await;
    (status, Json(body))
}

pub async fn ratings_post_handler(
    State(state): State<Arc<HttpState>>,
    Path(quiz_id): Path<String>,
    Json(req): Json<SubmitRatingRequest>,
) -> impl IntoResponse {
    let (status, body) = ratings_post_inner(&state, &quiz_id, req).await;
    (status, Json(body))
}

pub async fn recommend_track_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<TrackRequest>,
) -> impl IntoResponse {
    let (status, body) = recommend_track_inner(&state, req).await;
    (status, Json(body))
}

pub async fn analyze_input_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<AnalyzeInputRequest>,
) -> impl IntoResponse {
    let (status, body) = analyze_input_inner(&state, req).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> HttpState {
        HttpState::memory()
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "quizmill/1");
    }

    #[tokio::test]
    async fn test_health_inner_memory_backend() {
        let state = state();
        let (status, body) = health_inner(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backend"], "memory");
    }

    #[tokio::test]
    async fn test_vote_inner_missing_card_id() {
        let state = state();
        let (status, body) = vote_inner(&state, VoteRequest { card_id: None }).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = vote_inner(
            &state,
            VoteRequest {
                card_id: Some("   ".to_string()),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_vote_inner_counts_up() {
        let state = state();
        for expected in 1..=3i64 {
            let (status, body) = vote_inner(
                &state,
                VoteRequest {
                    card_id: Some("card-1".to_string()),
                },
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["cardId"], "card-1");
            assert_eq!(body["count"], expected);
        }

        let (status, body) = reactions_inner(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["card-1"], 3);
    }

    #[tokio::test]
    async fn test_save_step_inner_validation() {
        let state = state();
        let (status, _) = save_step_inner(
            &state,
            SaveStepRequest {
                session_id: None,
                responses: vec![],
                step_number: Some(1),
                total_steps: None,
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = save_step_inner(
            &state,
            SaveStepRequest {
                session_id: Some("s1".to_string()),
                responses: vec![],
                step_number: None,
                total_steps: None,
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_step_inner_reports_created_flag() {
        let state = state();
        let req = || SaveStepRequest {
            session_id: Some("s1".to_string()),
            responses: vec![],
            step_number: Some(1),
            total_steps: Some(4),
        };
        let (status, body) = save_step_inner(&state, req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["created"], true);

        let (_, body) = save_step_inner(&state, req()).await;
        assert_eq!(body["created"], false);
    }

    #[tokio::test]
    async fn test_record_inner_unknown_session_is_404() {
        let state = state();
        let (status, body) = record_inner(
            &state,
            RecordRequest {
                session_id: Some("ghost".to_string()),
                response: Some(StepResponse {
                    question_id: "q1".to_string(),
                    value: serde_json::json!("a"),
                    timestamp: Utc::now(),
                }),
            },
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_complete_inner_then_duplicate_conflicts() {
        let state = state();
        let req = || CompleteRequest {
            quiz_id: Some("quiz-a".to_string()),
            session_id: Some("s1".to_string()),
            responses: vec![],
            result: Some(serde_json::json!({"archetype": "owl"})),
        };
        let meta = ClientMeta {
            remote_addr: Some("198.51.100.4".to_string()),
            user_agent: Some("agent".to_string()),
        };
        let (status, body) = complete_inner(&state, meta.clone(), req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["sessionId"], "s1");

        let (status, _) = complete_inner(&state, meta, req()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_share_attempt_inner_missing_session() {
        let state = state();
        let (status, _) = share_attempt_inner(
            &state,
            ShareAttemptRequest {
                quiz_id: None,
                personality_id: None,
                timestamp: Some(1_724_600_000_000),
                session_id: Some("ghost".to_string()),
            },
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_recommend_track_inner_rejects_bad_action() {
        let state = state();
        let (status, _) = recommend_track_inner(
            &state,
            TrackRequest {
                recommendation_id: Some("rec-1".to_string()),
                action: Some("hovered".to_string()),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_recommend_track_inner_first_write_wins() {
        let state = state();
        let req = || TrackRequest {
            recommendation_id: Some("rec-1".to_string()),
            action: Some("viewed".to_string()),
        };
        let (status, body) = recommend_track_inner(&state, req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], true);

        let (_, body) = recommend_track_inner(&state, req()).await;
        assert_eq!(body["applied"], false);
    }

    #[tokio::test]
    async fn test_ratings_round_trip() {
        let state = state();
        let (status, body) = ratings_post_inner(
            &state,
            "quiz-a",
            SubmitRatingRequest {
                device_fingerprint: Some("fp_1".to_string()),
                rating: Some(3),
            },
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["userRating"], 3);

        ratings_post_inner(
            &state,
            "quiz-a",
            SubmitRatingRequest {
                device_fingerprint: Some("fp_2".to_string()),
                rating: Some(5),
            },
        )
        .await;

        let (status, body) =
            ratings_get_inner(&state, "quiz-a", Some("fp_1".to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["averageRating"], 4.0);
        assert_eq!(body["totalRatings"], 2);
        assert_eq!(body["userRating"], 3);
    }

    #[tokio::test]
    async fn test_ratings_post_inner_out_of_range() {
        let state = state();
        let (status, _) = ratings_post_inner(
            &state,
            "quiz-a",
            SubmitRatingRequest {
                device_fingerprint: Some("fp_1".to_string()),
                rating: Some(9),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_input_inner_always_defaults() {
        let state = state();
        for input in [None, Some("".to_string()), Some("something odd".to_string())] {
            let (status, body) = analyze_input_inner(
                &state,
                AnalyzeInputRequest {
                    quiz_id: Some("quiz-a".to_string()),
                    question_id: Some("q3".to_string()),
                    custom_input: input,
                },
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(body["nextQuestionId"], serde_json::Value::Null);
        }
    }

    #[test]
    fn test_client_meta_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "quizbot/1.0".parse().unwrap());
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1".parse().unwrap(),
        );
        let meta = client_meta_from_headers(&headers);
        assert_eq!(meta.user_agent.as_deref(), Some("quizbot/1.0"));
        assert_eq!(meta.remote_addr.as_deref(), Some("203.0.113.7"));
    }
}
