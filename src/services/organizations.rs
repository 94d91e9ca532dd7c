//! Organization view, member invitations and platform administration.

use std::time::Duration;

use tracing::{info, warn};

use crate::auth::require_role;
use crate::db::{
    self, DbPool, InviteCode, InvitePreview, Organization, OrganizationSummary, OrganizationUsage, Role,
    SendInviteRequest, SubscriptionTier, UpdateSubscriptionRequest, UpdateUserRoleRequest, User, UserResponse,
};
use crate::error::{Error, ResourceKind, Result};
use crate::notifications::{email, send_with_timeout};
use crate::tenancy::{count_resources, Invitee};
use crate::AppState;

#[derive(Debug, serde::Serialize)]
pub struct OrganizationView {
    #[serde(flatten)]
    pub summary: OrganizationSummary,
    /// Only filled in for ADMIN and above
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<UserResponse>>,
}

async fn fetch_organization(db: &DbPool, organization_id: &str) -> Result<Organization> {
    sqlx::query_as("SELECT * FROM organizations WHERE id = ?")
        .bind(organization_id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("Organization"))
}

async fn summarize(state: &AppState, organization: Organization) -> Result<OrganizationSummary> {
    let usage = OrganizationUsage {
        projects: count_resources(&state.db, &organization.id, ResourceKind::Project).await?,
        zones: count_resources(&state.db, &organization.id, ResourceKind::Zone).await?,
        devices: count_resources(&state.db, &organization.id, ResourceKind::Device).await?,
    };
    Ok(OrganizationSummary {
        max_projects: state.quotas.limit_for(&organization, ResourceKind::Project),
        max_zones: state.quotas.limit_for(&organization, ResourceKind::Zone),
        max_devices: state.quotas.limit_for(&organization, ResourceKind::Device),
        id: organization.id,
        name: organization.name,
        subscription_tier: organization.subscription_tier,
        usage,
    })
}

/// The caller's organization with tier, limits and usage
pub async fn current_organization(state: &AppState, user: &User) -> Result<OrganizationView> {
    let organization = fetch_organization(&state.db, &user.organization_id).await?;
    let summary = summarize(state, organization).await?;

    let members = if user.role_enum().at_least(Role::Admin) {
        let users: Vec<User> = sqlx::query_as("SELECT * FROM users WHERE organization_id = ? ORDER BY created_at ASC")
            .bind(&user.organization_id)
            .fetch_all(&state.db)
            .await?;
        Some(users.into_iter().map(UserResponse::from).collect())
    } else {
        None
    };

    Ok(OrganizationView { summary, members })
}

/// Issue an invite code for the caller's organization
pub async fn generate_invite_code(state: &AppState, user: &User, invitee: Invitee) -> Result<InviteCode> {
    require_role(user, Role::Admin)?;
    let invite = state
        .invites
        .generate(&user.organization_id, Some(&user.id), invitee)
        .await?;
    info!(organization_id = %user.organization_id, created_by = %user.id, "Invite code generated");
    Ok(invite)
}

fn display_name(user: &User) -> String {
    match (user.first_name.as_deref(), user.last_name.as_deref()) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        (Some(first), None) => first.to_string(),
        _ => user.email.clone(),
    }
}

/// Generate an invite and email its signup link.
///
/// The code is stored before delivery is attempted, so a delivery failure
/// still leaves a usable code behind.
pub async fn send_invite(state: &AppState, user: &User, request: SendInviteRequest) -> Result<InviteCode> {
    let email_address = request.email.trim().to_lowercase();
    let invite = generate_invite_code(
        state,
        user,
        Invitee {
            email: Some(email_address.clone()),
            first_name: request.first_name,
            last_name: request.last_name,
        },
    )
    .await?;

    let organization = fetch_organization(&state.db, &user.organization_id).await?;
    let accept_url = format!(
        "{}/auth/signup?invite={}",
        state.config.server.public_url.trim_end_matches('/'),
        invite.code
    );
    let html = email::render_invitation_html(
        &organization.name,
        &display_name(user),
        &accept_url,
        state.config.auth.invite_expiry_days,
    );
    let timeout = Duration::from_secs(state.config.email.send_timeout_secs);

    if let Err(e) = send_with_timeout(
        state.mailer.as_ref(),
        timeout,
        &email_address,
        &email::invitation_subject(&organization.name),
        &html,
    )
    .await
    {
        warn!(organization_id = %organization.id, invite_id = %invite.id, "Invite email not delivered: {}", e);
        return Err(Error::server(e));
    }

    info!(organization_id = %organization.id, invite_id = %invite.id, "Invite email sent");
    Ok(invite)
}

/// What an invitee sees before signing up
pub async fn preview_invite(state: &AppState, code: &str) -> Result<InvitePreview> {
    let invite = state.invites.validate(code).await?;
    let organization = fetch_organization(&state.db, &invite.organization_id).await?;
    Ok(InvitePreview {
        organization_id: organization.id,
        organization_name: organization.name,
        first_name: invite.first_name,
        last_name: invite.last_name,
        expires_at: invite.expires_at,
    })
}

// Platform administration (SUPER_ADMIN only)

pub async fn list_organizations(state: &AppState, user: &User) -> Result<Vec<OrganizationSummary>> {
    require_role(user, Role::SuperAdmin)?;
    let organizations: Vec<Organization> = sqlx::query_as("SELECT * FROM organizations ORDER BY created_at ASC")
        .fetch_all(&state.db)
        .await?;

    let mut summaries = Vec::with_capacity(organizations.len());
    for organization in organizations {
        summaries.push(summarize(state, organization).await?);
    }
    Ok(summaries)
}

pub async fn update_user_role(db: &DbPool, user: &User, request: UpdateUserRoleRequest) -> Result<UserResponse> {
    require_role(user, Role::SuperAdmin)?;
    let role: Role = request
        .role
        .parse()
        .map_err(|e: String| Error::validation("role", e))?;
    if request.user_id == user.id && !role.is_super_admin() {
        return Err(Error::validation("role", "You cannot remove your own SUPER_ADMIN role"));
    }

    let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(db::now())
        .bind(&request.user_id)
        .execute(db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound("User"));
    }

    info!(user_id = %request.user_id, role = %role, changed_by = %user.id, "User role updated");
    let updated = super::accounts::fetch_user(db, &request.user_id).await?;
    Ok(UserResponse::from(updated))
}

/// Move an organization to another tier and refresh its stored limits
pub async fn update_subscription(
    state: &AppState,
    user: &User,
    request: UpdateSubscriptionRequest,
) -> Result<OrganizationSummary> {
    require_role(user, Role::SuperAdmin)?;
    let tier: SubscriptionTier = request
        .tier
        .parse()
        .map_err(|e: String| Error::validation("tier", e))?;
    let limits = state.config.quotas.limits(tier);

    let result = sqlx::query(
        r#"
        UPDATE organizations SET subscription_tier = ?, max_projects = ?, max_zones = ?, max_devices = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(tier.as_str())
    .bind(limits.max_projects)
    .bind(limits.max_zones)
    .bind(limits.max_devices)
    .bind(db::now())
    .bind(&request.organization_id)
    .execute(&state.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound("Organization"));
    }

    info!(organization_id = %request.organization_id, tier = %tier, "Subscription updated");
    let organization = fetch_organization(&state.db, &request.organization_id).await?;
    summarize(state, organization).await
}
