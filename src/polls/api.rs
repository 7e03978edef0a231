//! Poll API Endpoints
//! Admin poll management and public voting; the store pushes every change to the hub

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::polls::{
    models::{CreatePollRequest, PollResults, PollSubject, VoteRequest},
    store::PollError,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::NotFound(msg) => ApiError::NotFound(msg.to_string()),
            PollError::Invalid(msg) => ApiError::BadRequest(msg),
            PollError::Conflict(msg) => ApiError::Conflict(msg),
            PollError::Closed => ApiError::Forbidden("Poll is closed".to_string()),
            PollError::Storage(e) => ApiError::Internal(e),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollListQuery {
    pub event_id: Option<String>,
}

/// POST /api/admin/polls
pub async fn create_poll(
    State(state): State<AppState>,
    Json(payload): Json<CreatePollRequest>,
) -> ApiResult<(StatusCode, Json<PollSubject>)> {
    let poll = state.polls.create_poll(&payload)?;
    Ok((StatusCode::CREATED, Json(poll)))
}

/// POST /api/admin/polls/:id/open
pub async fn open_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PollResults>> {
    Ok(Json(state.polls.set_open(&id, true)?))
}

/// POST /api/admin/polls/:id/close
pub async fn close_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PollResults>> {
    Ok(Json(state.polls.set_open(&id, false)?))
}

/// DELETE /api/admin/polls/:id
pub async fn delete_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.polls.delete_poll(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Poll not found"))
    }
}

/// GET /api/polls?eventId=
pub async fn list_polls(
    State(state): State<AppState>,
    Query(params): Query<PollListQuery>,
) -> ApiResult<Json<Vec<PollSubject>>> {
    let event_id = params.event_id.as_deref().filter(|e| !e.is_empty());
    Ok(Json(state.polls.list_polls(event_id)?))
}

/// GET /api/polls/:id - current results
pub async fn get_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PollResults>> {
    state
        .polls
        .results(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Poll not found"))
}

/// GET /api/polls/code/:code
pub async fn get_poll_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<PollResults>> {
    let id = state
        .polls
        .resolve_code(&code)?
        .ok_or_else(|| ApiError::not_found("Poll not found"))?;
    state
        .polls
        .results(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Poll not found"))
}

/// POST /api/polls/:id/vote
pub async fn vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<VoteRequest>,
) -> ApiResult<Json<PollResults>> {
    let results = state
        .polls
        .vote(&id, &payload.option_id, &payload.voter_key)?;
    Ok(Json(results))
}
