//! Seed helpers for database-backed tests.

use std::sync::Arc;

use crate::config::{Config, IngestConfig};
use crate::db::{self, DbPool, Role, User};
use crate::ingest::DeviceClassifier;
use crate::notifications::RecordingMailer;
use crate::AppState;

pub async fn state() -> (AppState, Arc<RecordingMailer>) {
    let pool = db::test_pool().await;
    let mailer = Arc::new(RecordingMailer::default());
    let mut config = Config::default();
    config.server.public_url = "https://fields.example.com".to_string();
    (AppState::new(config, pool, mailer.clone()), mailer)
}

pub async fn organization(pool: &DbPool, id: &str, tier: &str) {
    let now = db::now();
    sqlx::query(
        "INSERT INTO organizations (id, name, subscription_tier, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(format!("{} Farms", id))
    .bind(tier)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn project(pool: &DbPool, id: &str, organization_id: &str) {
    let now = db::now();
    sqlx::query(
        "INSERT INTO projects (id, organization_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(organization_id)
    .bind(format!("Project {}", id))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn zone(pool: &DbPool, id: &str, organization_id: &str, project_id: &str) {
    let now = db::now();
    sqlx::query(
        r#"
        INSERT INTO zones (id, organization_id, project_id, name, geometry, color, zone_type, crop_type, created_at, updated_at)
        VALUES (?, ?, ?, ?, '{"type":"Polygon","coordinates":[]}', 'PASTEL_GREEN', 'CROP', 'Maize', ?, ?)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(project_id)
    .bind(format!("Zone {}", id))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

/// Device typed by the default prefix table
pub async fn device(pool: &DbPool, eui: &str, zone_id: Option<&str>) {
    let now = db::now();
    let device_type = DeviceClassifier::new(&IngestConfig::default().device_prefixes).classify(eui);
    sqlx::query(
        "INSERT INTO devices (id, eui, device_type, name, model_name, zone_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(eui)
    .bind(device_type.as_str())
    .bind(eui)
    .bind(device_type.default_model_name())
    .bind(zone_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

/// Email is `<role>-<id>@example.com`
pub async fn user(
    pool: &DbPool,
    id: &str,
    organization_id: &str,
    role: Role,
    active_project_id: Option<&str>,
) -> User {
    let now = db::now();
    let email = format!("{}-{}@example.com", role.as_str().to_lowercase(), id);
    sqlx::query(
        r#"
        INSERT INTO users (id, organization_id, email, password_hash, role, active_project_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(&email)
    .bind(crate::auth::hash_password("fields4ever").unwrap())
    .bind(role.as_str())
    .bind(active_project_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();

    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}
