//! Organization endpoints for members, and platform administration for
//! SUPER_ADMIN.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::db::{
    InviteCodeResponse, OrganizationSummary, SendInviteRequest, UpdateSubscriptionRequest,
    UpdateUserRoleRequest, UserResponse,
};
use crate::services::organizations::{self, OrganizationView};
use crate::tenancy::Invitee;
use crate::AppState;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::validate_email;

/// GET /api/organization
pub async fn get_organization(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<OrganizationView>, ApiError> {
    Ok(Json(organizations::current_organization(&state, &user).await?))
}

/// POST /api/organization/invite-code
pub async fn create_invite_code(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<(StatusCode, Json<InviteCodeResponse>), ApiError> {
    let invite = organizations::generate_invite_code(&state, &user, Invitee::default()).await?;
    Ok((
        StatusCode::CREATED,
        Json(InviteCodeResponse {
            code: invite.code,
            expires_at: invite.expires_at,
        }),
    ))
}

/// POST /api/organization/invite
pub async fn send_invite(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SendInviteRequest>,
) -> Result<(StatusCode, Json<InviteCodeResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&request.email));
    errors.finish()?;

    let invite = organizations::send_invite(&state, &user, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(InviteCodeResponse {
            code: invite.code,
            expires_at: invite.expires_at,
        }),
    ))
}

/// GET /api/admin/organizations
pub async fn list_organizations(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<OrganizationSummary>>, ApiError> {
    Ok(Json(organizations::list_organizations(&state, &user).await?))
}

/// POST /api/admin/user-role
pub async fn update_user_role(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<UpdateUserRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(organizations::update_user_role(&state.db, &user, request).await?))
}

/// POST /api/admin/subscription
pub async fn update_subscription(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Result<Json<OrganizationSummary>, ApiError> {
    Ok(Json(organizations::update_subscription(&state, &user, request).await?))
}
