use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::source::SourceId;
use crate::store::BucketStore;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub store: Arc<dyn BucketStore>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/historical", post(request_historical))
        .route("/force-poll", post(force_poll))
        .route("/reference-time", post(set_reference_time))
        .route("/buckets/{source}/{*id}", get(get_bucket))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

#[derive(serde::Deserialize)]
struct HistoricalReq {
    source: String,
    start: NaiveDate,
    end: NaiveDate,
}

async fn request_historical(
    State(state): State<AppState>,
    Json(body): Json<HistoricalReq>,
) -> Result<StatusCode, ApiError> {
    let id: SourceId = body.source.parse()?;
    state.supervisor.request_historical(id, body.start, body.end)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(serde::Deserialize)]
struct ForcePollReq {
    source: String,
}

async fn force_poll(
    State(state): State<AppState>,
    Json(body): Json<ForcePollReq>,
) -> Result<StatusCode, ApiError> {
    let id: SourceId = body.source.parse()?;
    state.supervisor.force_poll_now(id)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(serde::Deserialize)]
struct ReferenceTimeReq {
    source: String,
    ts: String,
}

async fn set_reference_time(
    State(state): State<AppState>,
    Json(body): Json<ReferenceTimeReq>,
) -> Result<StatusCode, ApiError> {
    let id: SourceId = body.source.parse()?;
    state.supervisor.set_reference_time(id, &body.ts).await?;
    Ok(StatusCode::OK)
}

/// Debug read-through. The wildcard keeps the slashes of `DD/MM/YYYY` ids.
async fn get_bucket(
    State(state): State<AppState>,
    Path((source, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let source: SourceId = source.parse()?;
    match state
        .store
        .get_bucket(source, &id)
        .await
        .map_err(PipelineError::Storage)?
    {
        Some(bucket) => Ok(Json(bucket).into_response()),
        None => Ok((StatusCode::NOT_FOUND, format!("no bucket {id} for {source}")).into_response()),
    }
}
