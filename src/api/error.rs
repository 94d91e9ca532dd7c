//! Unified API error handling for Terrasense.
//!
//! Every handler error is returned in the same JSON envelope:
//! `{ "error": { "code", "message", "details"? } }`. Domain errors from the
//! services convert into it through `From<crate::error::Error>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Error;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Ingestion (400)
    InvalidPayload,
    MissingDeviceId,
    UnknownDeviceType,
    IncompleteSensorData,

    // Client errors (4xx)
    Unauthorized,
    Forbidden,
    QuotaExceeded,
    InvalidInvite,
    NotFound,
    Conflict,
    ValidationError,

    // Server errors (5xx)
    InternalError,
}

impl ErrorCode {
    /// Get the default HTTP status code for this error code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidPayload
            | ErrorCode::MissingDeviceId
            | ErrorCode::UnknownDeviceType
            | ErrorCode::IncompleteSensorData
            | ErrorCode::InvalidInvite
            | ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden | ErrorCode::QuotaExceeded => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the string representation of the error code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::MissingDeviceId => "missing_device_id",
            ErrorCode::UnknownDeviceType => "unknown_device_type",
            ErrorCode::IncompleteSensorData => "incomplete_sensor_data",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::QuotaExceeded => "quota_exceeded",
            ErrorCode::InvalidInvite => "invalid_invite",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

/// The inner error object in the response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (e.g., validation errors per field)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

/// Additional error details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Field-level validation errors
    ValidationErrors(HashMap<String, Vec<String>>),
    /// Generic key-value details
    Generic(HashMap<String, serde_json::Value>),
}

/// The full error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Unified API error type
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    status: StatusCode,
    message: String,
    details: Option<ErrorDetails>,
}

impl ApiError {
    /// Create a new API error with a specific code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code(),
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Add validation errors as details
    pub fn with_validation_errors(mut self, errors: HashMap<String, Vec<String>>) -> Self {
        self.details = Some(ErrorDetails::ValidationErrors(errors));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    // -------------------------------------------------------------------------
    // Convenience constructors for common error types
    // -------------------------------------------------------------------------

    /// Unauthorized error (401) - authentication required
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Not found error (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Validation error (400) with field-level details
    pub fn validation(errors: HashMap<String, Vec<String>>) -> Self {
        let message = if errors.len() == 1 {
            errors
                .values()
                .next()
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string())
        } else {
            format!("Validation failed for {} fields", errors.len())
        };

        Self::new(ErrorCode::ValidationError, message).with_validation_errors(errors)
    }

    /// Single field validation error
    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::validation(errors)
    }

    /// Internal server error (500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let response = ErrorResponse {
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message,
                details: self.details,
            },
        };

        (self.status, Json(response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

// -------------------------------------------------------------------------
// Conversion from the domain taxonomy
// -------------------------------------------------------------------------

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidPayload(_) => ApiError::new(ErrorCode::InvalidPayload, err.to_string()),
            Error::MissingDeviceId => ApiError::new(ErrorCode::MissingDeviceId, err.to_string()),
            Error::UnknownDeviceType { .. } => ApiError::new(ErrorCode::UnknownDeviceType, err.to_string()),
            Error::IncompleteSensorData { ref missing, .. } => {
                let mut details = HashMap::new();
                details.insert("missing".to_string(), serde_json::json!(missing));
                ApiError::new(ErrorCode::IncompleteSensorData, err.to_string())
                    .with_details(ErrorDetails::Generic(details))
            }
            Error::Unauthorized => ApiError::unauthorized(err.to_string()),
            Error::Forbidden(message) => ApiError::new(ErrorCode::Forbidden, message),
            Error::QuotaExceeded { kind, limit } => {
                let mut details = HashMap::new();
                details.insert("resource".to_string(), serde_json::json!(kind.to_string()));
                details.insert("limit".to_string(), serde_json::json!(limit));
                ApiError::new(ErrorCode::QuotaExceeded, err.to_string()).with_details(ErrorDetails::Generic(details))
            }
            Error::InvalidInvite => ApiError::new(ErrorCode::InvalidInvite, err.to_string()),
            Error::NotFound(_) => ApiError::not_found(err.to_string()),
            Error::Validation { field, message } => ApiError::validation_field(&field, message),
            Error::Conflict(message) => ApiError::new(ErrorCode::Conflict, message),
            Error::ServerError(cause) => {
                tracing::error!("Internal error: {:#}", cause);
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Error::from(err).into()
    }
}

// -------------------------------------------------------------------------
// Builder for validation errors (integrates with the validation module)
// -------------------------------------------------------------------------

/// Builder for collecting multiple validation errors
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: HashMap<String, Vec<String>>,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validation error for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error of a `Result<(), String>` validator, if any
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(message) = result {
            self.add(field, message);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Build the ApiError if there are any errors
    pub fn build(self) -> Option<ApiError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(ApiError::validation(self.errors))
        }
    }

    /// Return Ok(()) if no errors, or Err(ApiError) if there are errors
    pub fn finish(self) -> Result<(), ApiError> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DeviceType;
    use crate::error::ResourceKind;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::InvalidPayload("x".into()), StatusCode::BAD_REQUEST, "invalid_payload"),
            (Error::MissingDeviceId, StatusCode::BAD_REQUEST, "missing_device_id"),
            (
                Error::UnknownDeviceType { eui: "AA".into() },
                StatusCode::BAD_REQUEST,
                "unknown_device_type",
            ),
            (Error::Unauthorized, StatusCode::UNAUTHORIZED, "unauthorized"),
            (Error::forbidden("no"), StatusCode::FORBIDDEN, "forbidden"),
            (
                Error::QuotaExceeded { kind: ResourceKind::Zone, limit: 5 },
                StatusCode::FORBIDDEN,
                "quota_exceeded",
            ),
            (Error::InvalidInvite, StatusCode::BAD_REQUEST, "invalid_invite"),
            (Error::NotFound("Zone"), StatusCode::NOT_FOUND, "not_found"),
            (Error::Conflict("taken".into()), StatusCode::CONFLICT, "conflict"),
            (Error::validation("name", "required"), StatusCode::BAD_REQUEST, "validation_error"),
        ];
        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status(), status);
            assert_eq!(api.code().as_str(), code);
        }
    }

    #[test]
    fn test_server_error_hides_detail() {
        let api: ApiError = Error::server(anyhow::anyhow!("database is locked")).into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "Internal server error");
    }

    #[test]
    fn test_incomplete_sensor_data_lists_missing_fields() {
        let api: ApiError = Error::IncompleteSensorData {
            device_type: DeviceType::SoilMoisture,
            missing: vec!["ec"],
        }
        .into();
        match api.details {
            Some(ErrorDetails::Generic(details)) => assert_eq!(details["missing"], serde_json::json!(["ec"])),
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_validation_error_builder() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("name", "Name is required");
        builder.check("email", Err("Invalid email format".to_string()));
        builder.check("eui", Ok(()));
        builder.add("name", "Name is too short");

        let err = builder.build().unwrap();
        assert_eq!(err.code, ErrorCode::ValidationError);

        if let Some(ErrorDetails::ValidationErrors(errors)) = &err.details {
            assert_eq!(errors.get("name").unwrap().len(), 2);
            assert_eq!(errors.get("email").unwrap().len(), 1);
            assert!(!errors.contains_key("eui"));
        } else {
            panic!("Expected ValidationErrors details");
        }
    }
}
