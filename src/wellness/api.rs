//! Wellness API Endpoints
//! Companies, tasks, proof submission and admin review

use crate::app::AppState;
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};
use crate::wellness::{
    models::{
        Company, LeaderboardEntry, ReviewRequest, ReviewStatus, SubmitProofRequest, Task,
        TaskInput, TaskProof,
    },
    store::{TaskRemoval, WellnessError},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

impl From<WellnessError> for ApiError {
    fn from(err: WellnessError) -> Self {
        match err {
            WellnessError::NotFound(msg) => ApiError::NotFound(msg.to_string()),
            WellnessError::Invalid(msg) => ApiError::BadRequest(msg),
            WellnessError::Conflict(msg) => ApiError::Conflict(msg),
            WellnessError::Storage(e) => ApiError::Internal(e),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    /// Admins may include inactive tasks
    pub all: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ProofQuery {
    pub status: Option<String>,
}

/// GET /api/companies
pub async fn list_companies(State(state): State<AppState>) -> ApiResult<Json<Vec<Company>>> {
    Ok(Json(state.wellness.list_companies()?))
}

/// GET /api/companies/:id
pub async fn get_company(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Company>> {
    state
        .wellness
        .get_company(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Company not found"))
}

/// GET /api/leaderboard
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardQuery>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.wellness.leaderboard(limit)?))
}

/// GET /api/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<TaskListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let include_inactive = params.all.unwrap_or(false) && claims.is_admin();
    Ok(Json(state.wellness.list_tasks(include_inactive)?))
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    state
        .wellness
        .get_task(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Task not found"))
}

/// POST /api/admin/tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<TaskInput>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.wellness.create_task(&input)?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// PUT /api/admin/tasks/:id
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<TaskInput>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.wellness.update_task(&id, &input)?))
}

/// DELETE /api/admin/tasks/:id
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let result = match state.wellness.delete_task(&id)? {
        TaskRemoval::Deleted => "deleted",
        TaskRemoval::Deactivated => "deactivated",
    };
    Ok(Json(json!({ "id": id, "result": result })))
}

/// POST /api/proofs
pub async fn submit_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SubmitProofRequest>,
) -> ApiResult<(StatusCode, Json<TaskProof>)> {
    let company_id = claims
        .company_id
        .as_deref()
        .ok_or_else(|| ApiError::forbidden("Only company accounts can submit proofs"))?;

    let proof = state.wellness.submit_proof(company_id, &payload)?;
    Ok((StatusCode::CREATED, Json(proof)))
}

/// GET /api/proofs - the caller's company proofs
pub async fn list_my_proofs(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<TaskProof>>> {
    let Some(company_id) = claims.company_id.as_deref() else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(state.wellness.list_company_proofs(company_id)?))
}

/// GET /api/proofs/:id - owners and admins only; others get 404
pub async fn get_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskProof>> {
    let proof = state
        .wellness
        .get_proof(&id)?
        .filter(|p| {
            claims.is_admin() || claims.company_id.as_deref() == Some(p.company_id.as_str())
        })
        .ok_or_else(|| ApiError::not_found("Proof not found"))?;
    Ok(Json(proof))
}

/// GET /api/admin/proofs?status=pending
pub async fn list_proofs(
    State(state): State<AppState>,
    Query(params): Query<ProofQuery>,
) -> ApiResult<Json<Vec<TaskProof>>> {
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => Some(
            ReviewStatus::from_str(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown status: {}", raw)))?,
        ),
    };
    Ok(Json(state.wellness.list_proofs(status)?))
}

/// POST /api/admin/proofs/:id/approve
pub async fn approve_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    body: Option<Json<ReviewRequest>>,
) -> ApiResult<Json<TaskProof>> {
    let review = body.map(|Json(r)| r).unwrap_or_default();
    let proof = state
        .wellness
        .approve_proof(&id, &claims.email, review.note.as_deref())?;
    Ok(Json(proof))
}

/// POST /api/admin/proofs/:id/reject
pub async fn reject_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    body: Option<Json<ReviewRequest>>,
) -> ApiResult<Json<TaskProof>> {
    let review = body.map(|Json(r)| r).unwrap_or_default();
    let proof = state
        .wellness
        .reject_proof(&id, &claims.email, review.note.as_deref())?;
    Ok(Json(proof))
}
