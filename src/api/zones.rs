//! Zone API endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{CreateZoneRequest, UpdateZoneRequest, ZoneResponse, ZoneWithDevices};
use crate::services::zones;
use crate::AppState;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_create_zone, validate_name};

pub async fn list_zones(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ZoneResponse>>, ApiError> {
    Ok(Json(zones::list_zones(&state.db, &user).await?))
}

pub async fn get_zone(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ZoneWithDevices>, ApiError> {
    Ok(Json(zones::get_zone(&state.db, &user, &id).await?))
}

pub async fn create_zone(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateZoneRequest>,
) -> Result<(StatusCode, Json<ZoneWithDevices>), ApiError> {
    validate_create_zone(&request)?;
    let zone = zones::create_zone(&state, &user, request).await?;
    Ok((StatusCode::CREATED, Json(zone)))
}

pub async fn update_zone(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateZoneRequest>,
) -> Result<Json<ZoneResponse>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name("Zone name", &request.name));
    errors.finish()?;

    Ok(Json(zones::update_zone(&state.db, &user, &id, request).await?))
}

pub async fn delete_zone(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    zones::delete_zone(&state.db, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
