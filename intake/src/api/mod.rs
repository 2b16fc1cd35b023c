//! HTTP surface for the web tier and the grading workers.
//!
//! - `GET /health` → liveness plus the dispatch backlog
//! - `POST /api/handins` → submit an upload (only when intake is attached)
//! - `POST /api/handins/{id}/claim` → a worker started grading
//! - `POST /api/handins/{id}/result` → a worker finished grading
//!
//! For worker callbacks, duplicates and unknown ids are answered with `200`:
//! the worker did its part and must not retry. Only store failures answer
//! `503`.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod response;
pub mod submit;

use crate::correlator::{Correlation, GradeOutcome, ResultCorrelator, ResultMessage};
use crate::dispatch::OutboxRelay;
use crate::ids::HandinId;
use crate::intake::SubmissionIntake;
use response::{ApiResponse, Empty};

/// Request body cap for `POST /api/handins` unless configured otherwise.
pub const DEFAULT_UPLOAD_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Room for the non-file form fields and multipart framing.
const FORM_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub correlator: ResultCorrelator,
    /// Reported by `/health` when present.
    pub relay: Option<OutboxRelay>,
    /// Enables `POST /api/handins` when present.
    pub intake: Option<SubmissionIntake>,
    pub upload_body_limit: usize,
}

impl AppState {
    pub fn new(correlator: ResultCorrelator) -> Self {
        Self {
            correlator,
            relay: None,
            intake: None,
            upload_body_limit: DEFAULT_UPLOAD_BODY_LIMIT,
        }
    }

    pub fn with_relay(mut self, relay: OutboxRelay) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_intake(mut self, intake: SubmissionIntake) -> Self {
        self.intake = Some(intake);
        self
    }

    /// Largest accepted upload; the form overhead is added on top.
    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.upload_body_limit = usize::try_from(bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(FORM_OVERHEAD);
        self
    }
}

pub fn routes(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/api/handins/{id}/claim", post(claim_handin))
        .route("/api/handins/{id}/result", post(submit_result));

    if state.intake.is_some() {
        router = router.route(
            "/api/handins",
            post(submit::submit_handin).layer(DefaultBodyLimit::max(state.upload_body_limit)),
        );
    }

    router.with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: &'static str,
    pub dispatch_backlog: Option<u64>,
}

/// GET /health
///
/// ```json
/// { "success": true, "data": { "status": "ok", "dispatch_backlog": 0 }, "message": "Health check passed" }
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let backlog = match &state.relay {
        Some(relay) => relay.backlog().await.ok(),
        None => None,
    };
    Json(ApiResponse::success(
        HealthData {
            status: "ok",
            dispatch_backlog: backlog,
        },
        "Health check passed",
    ))
}

#[derive(Debug, Serialize)]
pub struct CorrelationData {
    pub handin_id: HandinId,
    pub correlation: Correlation,
}

fn correlation_response(handin_id: HandinId, correlation: Correlation) -> Response {
    let message = match correlation {
        Correlation::Applied => "Recorded",
        Correlation::Duplicate => "Already recorded",
        Correlation::Orphan => "Unknown handin, ignored",
    };
    (
        StatusCode::OK,
        Json(ApiResponse::success(
            CorrelationData {
                handin_id,
                correlation,
            },
            message,
        )),
    )
        .into_response()
}

fn unavailable(handin_id: &HandinId, err: sea_orm::DbErr) -> Response {
    tracing::error!(handin_id = %handin_id, error = %err, "handin store unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<Empty>::error("Handin store unavailable, retry later")),
    )
        .into_response()
}

/// POST /api/handins/{id}/claim
///
/// Moves the handin from `pending` to `grading`. Claiming twice, or claiming
/// a finished handin, answers `"duplicate"`.
async fn claim_handin(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let handin_id = HandinId::new(id);
    match state.correlator.on_claim(&handin_id).await {
        Ok(correlation) => correlation_response(handin_id, correlation),
        Err(e) => unavailable(&handin_id, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultRequest {
    pub outcome: GradeOutcome,
    /// Defaults to the time the callback is received.
    pub completed_at: Option<DateTime<Utc>>,
}

/// POST /api/handins/{id}/result
///
/// ### Request Body
/// ```json
/// {
///   "outcome": { "status": "graded", "score": 87.5, "brief": "7/8 tests", "detail": {} },
///   "completed_at": "2026-03-01T12:00:00Z"
/// }
/// ```
///
/// ### Response
/// - `200 OK` with `correlation` one of `applied`, `duplicate`, `orphan`
/// - `503 Service Unavailable` when the store cannot be written
async fn submit_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResultRequest>,
) -> Response {
    let message = ResultMessage {
        handin_id: HandinId::new(id),
        outcome: req.outcome,
        completed_at: req.completed_at.unwrap_or_else(Utc::now),
    };
    match state.correlator.on_result(&message).await {
        Ok(correlation) => correlation_response(message.handin_id, correlation),
        Err(e) => unavailable(&message.handin_id, e),
    }
}
