//! Unauthenticated read-only view of a published project.

use serde::Serialize;

use crate::db::{DbPool, Device, Project, PublicProject, Readings, Zone, ZoneDetails};
use crate::error::{Error, Result};

/// Most recent readings included per device
const RECENT_READINGS: i64 = 100;

/// A zone without its tenant identifiers
#[derive(Debug, Clone, Serialize)]
pub struct PublicZone {
    pub id: String,
    pub name: String,
    pub geometry: Option<serde_json::Value>,
    pub area: Option<f64>,
    pub color: String,
    #[serde(flatten)]
    pub details: ZoneDetails,
}

impl From<Zone> for PublicZone {
    fn from(zone: Zone) -> Self {
        let details = zone.details();
        Self {
            geometry: serde_json::from_str(&zone.geometry).ok(),
            id: zone.id,
            name: zone.name,
            area: zone.area,
            color: zone.color,
            details,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublicDevice {
    #[serde(flatten)]
    pub device: Device,
    pub readings: Readings,
}

#[derive(Debug, Serialize)]
pub struct PublicView {
    pub project: PublicProject,
    pub zones: Vec<PublicZone>,
    pub devices: Vec<PublicDevice>,
}

/// Load a project by public slug. Unpublished and unknown slugs are both
/// `NotFound`.
pub async fn load_public_project(db: &DbPool, slug: &str) -> Result<PublicView> {
    let project: Project = sqlx::query_as("SELECT * FROM projects WHERE public_slug = ? AND is_public = 1")
        .bind(slug.trim().to_lowercase())
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("Project"))?;
    let project_id = project.id.clone();
    let project = PublicProject::from_project(project).ok_or(Error::NotFound("Project"))?;

    let zones: Vec<Zone> = sqlx::query_as("SELECT * FROM zones WHERE project_id = ? ORDER BY created_at ASC")
        .bind(&project_id)
        .fetch_all(db)
        .await?;

    let devices: Vec<Device> = sqlx::query_as(
        r#"
        SELECT d.* FROM devices d
        JOIN zones z ON z.id = d.zone_id
        WHERE z.project_id = ?
        ORDER BY d.device_type ASC, d.number ASC, d.eui ASC
        "#,
    )
    .bind(&project_id)
    .fetch_all(db)
    .await?;

    let mut public_devices = Vec::with_capacity(devices.len());
    for device in devices {
        let readings = super::readings::latest_readings(db, &device.eui, device.type_enum(), RECENT_READINGS).await?;
        public_devices.push(PublicDevice { device, readings });
    }

    Ok(PublicView {
        project,
        zones: zones.into_iter().map(PublicZone::from).collect(),
        devices: public_devices,
    })
}
