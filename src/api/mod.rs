pub mod auth;
mod data;
mod devices;
pub mod error;
pub mod metrics;
mod organization;
mod projects;
mod public;
pub mod validation;
mod zones;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Session routes (signup and login are public)
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/invite/:code", get(auth::invite_preview));

    // Authenticated routes; each handler takes a `CurrentUser`, except the
    // device data endpoint which also serves public projects.
    let api_routes = Router::new()
        .route("/dashboard", get(projects::get_dashboard))
        // Projects
        .route("/projects", get(projects::list_projects).post(projects::create_project))
        .route("/projects/select", post(projects::select_project))
        .route("/projects/:id/public-access", put(projects::set_public_access))
        // Zones
        .route("/zones", get(zones::list_zones).post(zones::create_zone))
        .route(
            "/zones/:id",
            get(zones::get_zone).put(zones::update_zone).delete(zones::delete_zone),
        )
        // Devices
        .route("/devices", get(devices::list_devices).post(devices::create_device))
        .route(
            "/devices/:eui",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/devices/:eui/data", get(devices::device_data))
        // Organization
        .route("/organization", get(organization::get_organization))
        .route("/organization/invite-code", post(organization::create_invite_code))
        .route("/organization/invite", post(organization::send_invite))
        // Platform administration (SUPER_ADMIN)
        .route("/admin/organizations", get(organization::list_organizations))
        .route("/admin/user-role", post(organization::update_user_role))
        .route("/admin/subscription", post(organization::update_subscription))
        // Read-only public view
        .route("/public/:slug", get(public::get_public_project))
        // Telemetry webhook, guarded by its own token
        .route("/data", post(data::receive_uplink));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth::refresh_session))
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
