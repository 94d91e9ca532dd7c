//! Domain error taxonomy shared by the ingestion pipeline and the
//! interactive operations.
//!
//! Validation problems are raised as their specific variant at the point they
//! are detected; anything unexpected from the database or a collaborator
//! collapses into `ServerError`, whose detail is logged but never shown to
//! clients (see `api::error`).

use thiserror::Error;

use crate::db::DeviceType;

/// Resource kinds counted against subscription quotas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Project,
    Zone,
    Device,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Project => write!(f, "project"),
            ResourceKind::Zone => write!(f, "zone"),
            ResourceKind::Device => write!(f, "device"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Missing device identifier")]
    MissingDeviceId,

    #[error("Unknown device type for {eui}")]
    UnknownDeviceType { eui: String },

    #[error("Missing {device_type} sensor data: {}", missing.join(", "))]
    IncompleteSensorData {
        device_type: DeviceType,
        missing: Vec<&'static str>,
    },

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("The {kind} limit ({limit}) for this subscription has been reached")]
    QuotaExceeded { kind: ResourceKind, limit: i64 },

    #[error("Invalid or expired invite code")]
    InvalidInvite,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Conflict(String),

    #[error("Internal server error")]
    ServerError(#[source] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden(message.into())
    }

    pub fn server(err: impl Into<anyhow::Error>) -> Self {
        Error::ServerError(err.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.message().contains("UNIQUE constraint failed") {
                return Error::Conflict("A resource with this identifier already exists".to_string());
            }
        }
        Error::ServerError(err.into())
    }
}
