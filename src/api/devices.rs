//! Device API endpoints, including the reading history query.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{CreateDeviceRequest, Device, UpdateDeviceRequest};
use crate::services::devices;
use crate::services::readings::{self, DeviceReadings, ReadingsQuery};
use crate::AppState;

use super::auth::{CurrentUser, MaybeUser};
use super::error::ApiError;
use super::validation::{validate_create_device, validate_update_device};

pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Device>>, ApiError> {
    Ok(Json(devices::list_devices(&state.db, &user).await?))
}

pub async fn get_device(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(eui): Path<String>,
) -> Result<Json<Device>, ApiError> {
    Ok(Json(devices::get_device(&state.db, &user, &eui).await?))
}

/// POST /api/devices - register a device into a zone
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    validate_create_device(&request)?;
    let device = devices::create_device(&state, &user, request).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

pub async fn update_device(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(eui): Path<String>,
    Json(request): Json<UpdateDeviceRequest>,
) -> Result<Json<Device>, ApiError> {
    validate_update_device(&request)?;
    Ok(Json(devices::update_device(&state.db, &user, &eui, request).await?))
}

pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(eui): Path<String>,
) -> Result<StatusCode, ApiError> {
    devices::delete_device(&state.db, &user, &eui).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/devices/:eui/data - readable without a session for public projects
pub async fn device_data(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(eui): Path<String>,
    Query(query): Query<ReadingsQuery>,
) -> Result<Json<DeviceReadings>, ApiError> {
    let readings = readings::device_readings(&state.db, user.as_ref(), &eui, &query, chrono::Utc::now()).await?;
    Ok(Json(readings))
}
