//! Input validation for API requests.
//!
//! Field validators return `Result<(), String>`; the request-level functions
//! collect them with [`ValidationErrorBuilder`] so a client sees every bad
//! field at once.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{CreateDeviceRequest, CreateProjectRequest, CreateZoneRequest, SignupRequest, UpdateDeviceRequest};
use crate::ingest::classifier::normalize_eui;

lazy_static! {
    /// Pragmatic email shape: something@something.tld
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+'-]+@[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)+$"
    ).unwrap();

    /// 64-bit LoRaWAN EUI in hex, after separators are stripped
    static ref EUI_REGEX: Regex = Regex::new(r"^[0-9A-F]{16}$").unwrap();
}

const MAX_NAME_LEN: usize = 100;

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    match crate::auth::validate_password_strength(password) {
        Some(message) => Err(message),
        None => Ok(()),
    }
}

pub fn validate_eui(eui: &str) -> Result<(), String> {
    let normalized = normalize_eui(eui);
    if normalized.is_empty() {
        return Err("Device EUI is required".to_string());
    }
    if !EUI_REGEX.is_match(&normalized) {
        return Err("Device EUI must be 16 hexadecimal characters".to_string());
    }
    Ok(())
}

/// Non-empty display name of at most 100 characters
pub fn validate_name(label: &str, name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("{} is required", label));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("{} is too long (max {} characters)", label, MAX_NAME_LEN));
    }
    Ok(())
}

/// Optional `YYYY-MM-DD` date
pub fn validate_date(date: &Option<String>) -> Result<(), String> {
    match date.as_deref().map(str::trim) {
        None | Some("") => Ok(()),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|_| ())
            .map_err(|_| "Date must be in YYYY-MM-DD format".to_string()),
    }
}

fn validate_non_negative(value: Option<f64>, label: &str) -> Result<(), String> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(format!("{} must be a non-negative number", label)),
        _ => Ok(()),
    }
}

fn validate_interval(interval: Option<i64>) -> Result<(), String> {
    match interval {
        Some(seconds) if seconds <= 0 => Err("Reporting interval must be positive".to_string()),
        _ => Ok(()),
    }
}

pub fn validate_signup(request: &SignupRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&request.email));
    errors.check("password", validate_password(&request.password));
    errors.finish()
}

pub fn validate_create_project(request: &CreateProjectRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name("Project name", &request.name));
    if let Some(geometry) = &request.geometry {
        if !geometry.is_object() {
            errors.add("geometry", "Geometry must be a GeoJSON object");
        }
    }
    errors.finish()
}

pub fn validate_create_zone(request: &CreateZoneRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name("Zone name", &request.name));
    for eui in &request.device_euis {
        errors.check("device_euis", validate_eui(eui));
    }
    match &request.details {
        crate::db::ZoneDetails::Crop(crop) => {
            errors.check("planting_date", validate_date(&crop.planting_date));
            errors.check("harvest_date", validate_date(&crop.harvest_date));
        }
        crate::db::ZoneDetails::WaterWell(well) => {
            errors.check("construction_date", validate_date(&well.construction_date));
        }
    }
    errors.finish()
}

pub fn validate_create_device(request: &CreateDeviceRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("eui", validate_eui(&request.eui));
    errors.check("name", validate_name("Device name", &request.name));
    if request.zone_id.trim().is_empty() {
        errors.add("zone_id", "Zone is required");
    }
    errors.check("installation_date", validate_date(&request.installation_date));
    errors.check("installed_depth", validate_non_negative(request.installed_depth, "Installed depth"));
    errors.check("reporting_interval", validate_interval(request.reporting_interval));
    errors.finish()
}

pub fn validate_update_device(request: &UpdateDeviceRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &request.name {
        errors.check("name", validate_name("Device name", name));
    }
    errors.check("installation_date", validate_date(&request.installation_date));
    errors.check("installed_depth", validate_non_negative(request.installed_depth, "Installed depth"));
    errors.check("reporting_interval", validate_interval(request.reporting_interval));
    errors.finish()
}
