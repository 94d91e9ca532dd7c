//! Signup, login and logout.

use tracing::info;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password};
use crate::config::TierLimits;
use crate::db::{self, DbPool, Role, Session, SignupRequest, SubscriptionTier, User};
use crate::error::{Error, Result};
use crate::tenancy::NewMember;
use crate::AppState;

/// A freshly authenticated user and the raw token to hand to the client
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: User,
    pub token: String,
    pub session: Session,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Organization name for a self-service signup
fn default_organization_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    format!("{}'s Organization", local)
}

async fn start_session(state: &AppState, user: User) -> Result<SignedIn> {
    let token = state.sessions.create_token();
    let session = state.sessions.create_session(&token, &user.id).await?;
    Ok(SignedIn {
        user,
        token,
        session,
    })
}

/// Create an account. With an invite code the user joins the inviting
/// organization as a VIEWER; without one a new FREE organization is created
/// with the user as its ADMIN.
pub async fn signup(state: &AppState, request: SignupRequest) -> Result<SignedIn> {
    let email = normalize_email(&request.email);
    let password_hash = hash_password(&request.password)?;

    let user = match request.invite_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => {
            state
                .invites
                .consume(
                    code,
                    NewMember {
                        email,
                        password_hash,
                        first_name: request.first_name,
                        last_name: request.last_name,
                    },
                )
                .await?
        }
        _ => {
            let limits = state.config.quotas.limits(SubscriptionTier::Free);
            create_owner(&state.db, &email, &password_hash, request.first_name, request.last_name, limits)
                .await?
        }
    };

    info!(user_id = %user.id, organization_id = %user.organization_id, role = %user.role, "User signed up");
    start_session(state, user).await
}

async fn create_owner(
    db: &DbPool,
    email: &str,
    password_hash: &str,
    first_name: Option<String>,
    last_name: Option<String>,
    limits: TierLimits,
) -> Result<User> {
    let now = db::now();
    let organization_id = Uuid::new_v4().to_string();

    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO organizations (id, name, subscription_tier, max_projects, max_zones, max_devices, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&organization_id)
    .bind(default_organization_name(email))
    .bind(SubscriptionTier::Free.as_str())
    .bind(limits.max_projects)
    .bind(limits.max_zones)
    .bind(limits.max_devices)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        organization_id,
        email: email.to_string(),
        password_hash: password_hash.to_string(),
        first_name,
        last_name,
        role: Role::Admin.as_str().to_string(),
        active_project_id: None,
        created_at: now.clone(),
        updated_at: now,
    };
    insert_user(&mut tx, &user).await?;

    tx.commit().await?;
    Ok(user)
}

async fn insert_user(conn: &mut sqlx::SqliteConnection, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (id, organization_id, email, password_hash, first_name, last_name, role, active_project_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(&user.organization_id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.role)
    .bind(&user.active_project_id)
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .execute(conn)
    .await
    .map_err(|e| match Error::from(e) {
        Error::Conflict(_) => Error::Conflict("An account with this email already exists".to_string()),
        other => other,
    })?;
    Ok(())
}

pub async fn login(state: &AppState, email: &str, password: &str) -> Result<SignedIn> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(normalize_email(email))
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or(Error::Unauthorized)?;
    if !verify_password(password, &user.password_hash) {
        return Err(Error::Unauthorized);
    }

    info!(user_id = %user.id, "User logged in");
    start_session(state, user).await
}

pub async fn logout(state: &AppState, token: &str) -> Result<()> {
    state.sessions.invalidate(token).await
}

/// Make sure a platform administrator exists, creating its organization on
/// first start. An existing account with the email is promoted.
pub async fn ensure_super_admin(state: &AppState, email: &str, password: &str) -> Result<User> {
    let email = normalize_email(email);
    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    if let Some(user) = existing {
        if !user.role_enum().is_super_admin() {
            sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
                .bind(Role::SuperAdmin.as_str())
                .bind(db::now())
                .bind(&user.id)
                .execute(&state.db)
                .await?;
            info!(user_id = %user.id, "Promoted bootstrap user to SUPER_ADMIN");
        }
        return fetch_user(&state.db, &user.id).await;
    }

    let limits = state.config.quotas.limits(SubscriptionTier::Enterprise);
    let password_hash = hash_password(password)?;
    let user = create_owner(&state.db, &email, &password_hash, None, None, limits).await?;

    sqlx::query("UPDATE organizations SET subscription_tier = ? WHERE id = ?")
        .bind(SubscriptionTier::Enterprise.as_str())
        .bind(&user.organization_id)
        .execute(&state.db)
        .await?;
    sqlx::query("UPDATE users SET role = ? WHERE id = ?")
        .bind(Role::SuperAdmin.as_str())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    info!(user_id = %user.id, "Created bootstrap SUPER_ADMIN");
    fetch_user(&state.db, &user.id).await
}

pub async fn fetch_user(db: &DbPool, user_id: &str) -> Result<User> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("User"))
}
