//! HTTP surface: job submission, status, SSE progress, rethink and knowledge.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::concept::{ConceptRecord, normalize_key};
use crate::error::AppError;
use crate::gateway::StatusGateway;
use crate::registry::JobRegistry;
use crate::rethink::{RethinkOutcome, RethinkService};
use crate::state_machine::{JobMode, JobView};
use crate::store::KnowledgeStore;
use crate::worker::JobSubmitter;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(msg) => ApiError::BadRequest(msg),
            AppError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => {
                warn!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub submitter: JobSubmitter,
    pub gateway: StatusGateway,
    pub rethink: Arc<RethinkService>,
    pub knowledge: Arc<dyn KnowledgeStore>,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    mode: String,
}

#[derive(Debug, Deserialize)]
struct RethinkRequest {
    question: String,
    #[serde(default)]
    previous_answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnknownRequest {
    concept: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(job_status))
        .route("/jobs/:id/events", get(job_events))
        .route("/rethink", post(rethink))
        .route("/knowledge/:key", get(knowledge))
        .route("/concepts/unknown", post(queue_unknown))
        .with_state(state)
}

/// Binds and serves until the process is stopped.
pub async fn serve(state: AppState, bind: &str) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "HTTP server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// POST /jobs
async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<impl IntoResponse> {
    let mode: JobMode = req.mode.parse()?;
    let view = state.submitter.submit(mode).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": view.id }))))
}

/// GET /jobs/:id
async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    Ok(Json(state.registry.snapshot(&id).await?))
}

/// GET /jobs/:id/events
///
/// One `status` event per poll until the job is terminal, then the stream ends.
async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let mut subscription = state.gateway.subscribe(&id).await?;
    info!(job_id = %id, "status stream opened");

    let stream = async_stream::stream! {
        while let Some(view) = subscription.next().await {
            match serde_json::to_string(&view) {
                Ok(data) => yield Ok(Event::default().event("status").data(data)),
                Err(e) => warn!(job_id = %view.id, error = %e, "could not serialize snapshot"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /rethink
async fn rethink(
    State(state): State<AppState>,
    Json(req): Json<RethinkRequest>,
) -> ApiResult<Json<RethinkOutcome>> {
    let outcome = state
        .rethink
        .rethink(&req.question, req.previous_answer.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// GET /knowledge/:key
async fn knowledge(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<ConceptRecord>> {
    let key = normalize_key(&key).unwrap_or(key);
    state
        .knowledge
        .get(&key)
        .await
        .map_err(|e| ApiError::from(AppError::from(e)))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(key))
}

/// POST /concepts/unknown
async fn queue_unknown(
    State(state): State<AppState>,
    Json(req): Json<UnknownRequest>,
) -> ApiResult<impl IntoResponse> {
    let key = normalize_key(&req.concept)
        .ok_or_else(|| ApiError::BadRequest(format!("'{}' is not a concept", req.concept)))?;
    state
        .knowledge
        .add_unknown(&key)
        .await
        .map_err(|e| ApiError::from(AppError::from(e)))?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "key": key }))))
}
