use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::services::public::{self, PublicView};
use crate::AppState;

use super::error::ApiError;

/// GET /api/public/:slug - no authentication
pub async fn get_public_project(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<PublicView>, ApiError> {
    Ok(Json(public::load_public_project(&state.db, &slug).await?))
}
