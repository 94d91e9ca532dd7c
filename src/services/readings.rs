//! Time-range queries over a device's reading history.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::FromRow;

use crate::auth::ensure_owned;
use crate::db::{self, AirReading, DbPool, Device, DeviceType, LiquidReading, Readings, SoilReading, User};
use crate::error::{Error, Result};
use crate::ingest::classifier::normalize_eui;

const DEFAULT_RANGE: &str = "1d";

#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    pub range: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Resolved query window. `start` is `None` for the full history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeviceReadings {
    pub eui: String,
    pub device_type: DeviceType,
    pub start: Option<String>,
    pub end: String,
    pub readings: Readings,
}

fn range_length(range: &str) -> Option<Option<Duration>> {
    let days = match range {
        "1d" => 1,
        "3d" => 3,
        "1w" => 7,
        "2w" => 14,
        "1m" => 30,
        "3m" => 90,
        "6m" => 180,
        "1y" => 365,
        "all" => return Some(None),
        _ => return None,
    };
    Some(Some(Duration::days(days)))
}

fn parse_bound(field: &str, value: &str) -> Result<DateTime<Utc>> {
    db::parse_timestamp(value.trim())
        .ok_or_else(|| Error::validation(field, "Expected an RFC 3339 timestamp"))
}

/// Turn query parameters into a window ending at `end` (or `now`).
/// An explicit `start` overrides the named range.
pub fn resolve_window(query: &ReadingsQuery, now: DateTime<Utc>) -> Result<Window> {
    let end = match query.end.as_deref().filter(|v| !v.trim().is_empty()) {
        Some(value) => parse_bound("end", value)?,
        None => now,
    };

    let start = match query.start.as_deref().filter(|v| !v.trim().is_empty()) {
        Some(value) => Some(parse_bound("start", value)?),
        None => {
            let range = query.range.as_deref().unwrap_or(DEFAULT_RANGE);
            let length = range_length(range)
                .ok_or_else(|| Error::validation("range", format!("Unsupported range: {}", range)))?;
            length.map(|length| end - length)
        }
    };

    if start.is_some_and(|start| start > end) {
        return Err(Error::validation("start", "Start must not be after end"));
    }
    Ok(Window { start, end })
}

async fn fetch_series<T>(db: &DbPool, table: &str, eui: &str, window: &Window) -> Result<Vec<T>>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let sql = format!(
        "SELECT * FROM {} WHERE device_eui = ? AND (? IS NULL OR received_at >= ?) AND received_at <= ? ORDER BY received_at ASC, id ASC",
        table
    );
    let start = window.start.map(db::timestamp);
    let rows = sqlx::query_as(&sql)
        .bind(eui)
        .bind(&start)
        .bind(&start)
        .bind(db::timestamp(window.end))
        .fetch_all(db)
        .await?;
    Ok(rows)
}

async fn fetch_latest<T>(db: &DbPool, table: &str, eui: &str, limit: i64) -> Result<Vec<T>>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let sql = format!(
        "SELECT * FROM {} WHERE device_eui = ? ORDER BY received_at DESC, id DESC LIMIT ?",
        table
    );
    let mut rows: Vec<T> = sqlx::query_as(&sql).bind(eui).bind(limit).fetch_all(db).await?;
    rows.reverse();
    Ok(rows)
}

/// Readings of one device inside `window`, oldest first
pub async fn readings_in_window(db: &DbPool, eui: &str, device_type: DeviceType, window: &Window) -> Result<Readings> {
    Ok(match device_type {
        DeviceType::Co2Sensor => Readings::Air(fetch_series::<AirReading>(db, "air_readings", eui, window).await?),
        DeviceType::SoilMoisture => Readings::Soil(fetch_series::<SoilReading>(db, "soil_readings", eui, window).await?),
        DeviceType::LiquidLevel => {
            Readings::Liquid(fetch_series::<LiquidReading>(db, "liquid_readings", eui, window).await?)
        }
        DeviceType::Unknown => {
            return Err(Error::validation("device_type", "Device type is unknown; no readings are stored"))
        }
    })
}

/// The `limit` most recent readings of one device, oldest first
pub async fn latest_readings(db: &DbPool, eui: &str, device_type: DeviceType, limit: i64) -> Result<Readings> {
    Ok(match device_type {
        DeviceType::Co2Sensor => Readings::Air(fetch_latest(db, "air_readings", eui, limit).await?),
        DeviceType::SoilMoisture => Readings::Soil(fetch_latest(db, "soil_readings", eui, limit).await?),
        DeviceType::LiquidLevel => Readings::Liquid(fetch_latest(db, "liquid_readings", eui, limit).await?),
        // Nothing is ever stored for an unclassified device
        DeviceType::Unknown => Readings::Liquid(Vec::new()),
    })
}

/// Public-project status of the zone a device sits in
async fn zone_visibility(db: &DbPool, zone_id: &str) -> Result<Option<(String, bool)>> {
    let row: Option<(String, bool)> = sqlx::query_as(
        r#"
        SELECT z.organization_id, p.is_public FROM zones z
        JOIN projects p ON p.id = z.project_id
        WHERE z.id = ?
        "#,
    )
    .bind(zone_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Reading history for a device.
///
/// Devices in a public project are readable without a session. Otherwise the
/// caller must be signed in and share the device's organization, or be
/// SUPER_ADMIN.
pub async fn device_readings(
    db: &DbPool,
    user: Option<&User>,
    eui: &str,
    query: &ReadingsQuery,
    now: DateTime<Utc>,
) -> Result<DeviceReadings> {
    let device: Device = sqlx::query_as("SELECT * FROM devices WHERE eui = ?")
        .bind(normalize_eui(eui))
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("Device"))?;

    let placement = match device.zone_id.as_deref() {
        Some(zone_id) => zone_visibility(db, zone_id).await?,
        None => None,
    };

    match (placement, user) {
        (Some((_, true)), _) => {}
        (_, None) => return Err(Error::Unauthorized),
        (Some((organization_id, false)), Some(user)) => ensure_owned(user, &organization_id, "Device")?,
        (None, Some(user)) if user.role_enum().is_super_admin() => {}
        (None, Some(_)) => return Err(Error::NotFound("Device")),
    }

    let window = resolve_window(query, now)?;
    let device_type = device.type_enum();
    let readings = readings_in_window(db, &device.eui, device_type, &window).await?;

    Ok(DeviceReadings {
        eui: device.eui,
        device_type,
        start: window.start.map(db::timestamp),
        end: db::timestamp(window.end),
        readings,
    })
}
