//! Projects: listing, creation, active-project selection and public sharing.

use tracing::info;
use uuid::Uuid;

use crate::auth::{ensure_owned, require_role, require_write, Scope};
use crate::db::{
    self, CreateProjectRequest, DbPool, Project, PublicAccessRequest, PublicAccessResponse, Role,
    User,
};
use crate::error::{Error, ResourceKind, Result};
use crate::AppState;

const MAX_SLUG_LEN: usize = 50;

/// URL-friendly slug: lowercase ASCII alphanumerics separated by single dashes
pub fn generate_slug(name: &str) -> String {
    let slug = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug: String = slug.chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

/// First of `base`, `base-1`, `base-2`, … not held by another project
async fn unique_slug(db: &DbPool, base: &str, project_id: &str) -> Result<String> {
    let mut candidate = base.to_string();
    let mut counter = 1;
    loop {
        let holder: Option<String> = sqlx::query_scalar("SELECT id FROM projects WHERE public_slug = ?")
            .bind(&candidate)
            .fetch_optional(db)
            .await?;
        match holder {
            None => return Ok(candidate),
            Some(id) if id == project_id => return Ok(candidate),
            Some(_) => {
                candidate = format!("{}-{}", base, counter);
                counter += 1;
            }
        }
    }
}

pub async fn list_projects(db: &DbPool, user: &User) -> Result<Vec<Project>> {
    let scope = Scope::organization(user);
    let projects = sqlx::query_as(
        "SELECT * FROM projects WHERE (? IS NULL OR organization_id = ?) ORDER BY created_at ASC",
    )
    .bind(&scope.organization_id)
    .bind(&scope.organization_id)
    .fetch_all(db)
    .await?;
    Ok(projects)
}

/// Fetch a project the user may see
pub async fn get_project(db: &DbPool, user: &User, project_id: &str) -> Result<Project> {
    let project: Project = sqlx::query_as("SELECT * FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("Project"))?;
    ensure_owned(user, &project.organization_id, "Project")?;
    Ok(project)
}

/// Create a project in the user's organization and make it their active one
pub async fn create_project(state: &AppState, user: &User, request: CreateProjectRequest) -> Result<Project> {
    require_write(user)?;
    state
        .quotas
        .check(&state.db, &user.organization_id, ResourceKind::Project)
        .await?;

    let now = db::now();
    let project = Project {
        id: Uuid::new_v4().to_string(),
        organization_id: user.organization_id.clone(),
        name: request.name.trim().to_string(),
        purpose: request.purpose,
        geometry: request.geometry.map(|v| v.to_string()),
        center: request.center.map(|v| v.to_string()),
        is_public: false,
        public_slug: None,
        public_title: None,
        public_description: None,
        created_at: now.clone(),
        updated_at: now.clone(),
    };

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO projects (id, organization_id, name, purpose, geometry, center, is_public, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&project.id)
    .bind(&project.organization_id)
    .bind(&project.name)
    .bind(&project.purpose)
    .bind(&project.geometry)
    .bind(&project.center)
    .bind(&project.created_at)
    .bind(&project.updated_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE users SET active_project_id = ?, updated_at = ? WHERE id = ?")
        .bind(&project.id)
        .bind(&now)
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(project_id = %project.id, organization_id = %project.organization_id, "Project created");
    Ok(project)
}

/// Point the user's dashboards at another project
pub async fn select_active_project(db: &DbPool, user: &User, project_id: &str) -> Result<User> {
    let project = get_project(db, user, project_id).await?;

    sqlx::query("UPDATE users SET active_project_id = ?, updated_at = ? WHERE id = ?")
        .bind(&project.id)
        .bind(db::now())
        .bind(&user.id)
        .execute(db)
        .await?;

    super::accounts::fetch_user(db, &user.id).await
}

/// Publish or unpublish a project's read-only view
pub async fn set_public_access(
    state: &AppState,
    user: &User,
    project_id: &str,
    request: PublicAccessRequest,
) -> Result<PublicAccessResponse> {
    require_role(user, Role::Admin)?;
    let project = get_project(&state.db, user, project_id).await?;

    let slug = if request.is_public {
        Some(unique_slug(&state.db, &generate_slug(&project.name), &project.id).await?)
    } else {
        None
    };

    sqlx::query(
        r#"
        UPDATE projects SET is_public = ?, public_slug = ?, public_title = ?, public_description = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(request.is_public)
    .bind(&slug)
    .bind(&request.public_title)
    .bind(&request.public_description)
    .bind(db::now())
    .bind(&project.id)
    .execute(&state.db)
    .await?;

    info!(project_id = %project.id, is_public = request.is_public, "Project public access updated");

    let public_url = slug.as_ref().map(|s| {
        format!(
            "{}/api/public/{}",
            state.config.server.public_url.trim_end_matches('/'),
            s
        )
    });
    Ok(PublicAccessResponse {
        is_public: request.is_public,
        public_slug: slug,
        public_url,
    })
}
