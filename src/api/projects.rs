//! Projects API endpoints and the dashboard that is scoped by them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    CreateProjectRequest, Project, PublicAccessRequest, PublicAccessResponse, SelectProjectRequest,
    UserResponse,
};
use crate::services::dashboard::{self, Dashboard};
use crate::services::projects;
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;
use super::validation::validate_create_project;

/// GET /api/dashboard
pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Dashboard>, ApiError> {
    Ok(Json(dashboard::load_dashboard(&state.db, &user).await?))
}

/// GET /api/projects
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(projects::list_projects(&state.db, &user).await?))
}

/// POST /api/projects
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    validate_create_project(&request)?;
    let project = projects::create_project(&state, &user, request).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// POST /api/projects/select
pub async fn select_project(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SelectProjectRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = projects::select_active_project(&state.db, &user, &request.project_id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// PUT /api/projects/:id/public-access
pub async fn set_public_access(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<PublicAccessRequest>,
) -> Result<Json<PublicAccessResponse>, ApiError> {
    Ok(Json(projects::set_public_access(&state, &user, &id, request).await?))
}
