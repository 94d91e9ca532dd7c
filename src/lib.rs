pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod notifications;
pub mod services;
pub mod tenancy;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::auth::SessionManager;
use crate::ingest::DeviceClassifier;
use crate::notifications::Mailer;
use crate::tenancy::{InviteFlow, QuotaEnforcer};

/// Process-wide state handed to every request.
///
/// Holds configuration and handles to external collaborators only; there is
/// no mutable in-process state.
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub classifier: DeviceClassifier,
    pub sessions: SessionManager,
    pub invites: InviteFlow,
    pub quotas: QuotaEnforcer,
    pub mailer: Arc<dyn Mailer>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, mailer: Arc<dyn Mailer>) -> Self {
        let classifier = DeviceClassifier::new(&config.ingest.device_prefixes);
        let sessions = SessionManager::new(db.clone(), &config.auth);
        let invites = InviteFlow::new(db.clone(), config.auth.invite_expiry_days);
        let quotas = QuotaEnforcer::new(config.quotas.clone());
        Self {
            config,
            db,
            classifier,
            sessions,
            invites,
            quotas,
            mailer,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
