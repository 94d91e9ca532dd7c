//! Zone CRUD. A zone is either a crop field or a water well; the columns of
//! the other type are always stored as NULL.

use tracing::info;
use uuid::Uuid;

use crate::auth::{ensure_owned, require_write, Scope};
use crate::db::{
    self, CreateZoneRequest, DbPool, Device, UpdateZoneRequest, User, Zone, ZoneColor, ZoneDetails,
    ZoneResponse, ZoneWithDevices,
};
use crate::error::{Error, ResourceKind, Result};
use crate::AppState;

/// Flattened detail columns for one zone type
#[derive(Debug, Default)]
struct DetailColumns {
    crop_type: Option<String>,
    planting_date: Option<String>,
    harvest_date: Option<String>,
    soil_type: Option<String>,
    notes: Option<String>,
    well_depth: Option<f64>,
    well_diameter: Option<f64>,
    well_construction_date: Option<String>,
}

impl From<&ZoneDetails> for DetailColumns {
    fn from(details: &ZoneDetails) -> Self {
        match details {
            ZoneDetails::Crop(crop) => Self {
                crop_type: Some(crop.crop_type.trim().to_string()),
                planting_date: crop.planting_date.clone(),
                harvest_date: crop.harvest_date.clone(),
                soil_type: crop.soil_type.clone(),
                notes: crop.notes.clone(),
                ..Default::default()
            },
            ZoneDetails::WaterWell(well) => Self {
                well_depth: Some(well.depth),
                well_diameter: Some(well.well_diameter),
                well_construction_date: well.construction_date.clone(),
                ..Default::default()
            },
        }
    }
}

fn validate_details(details: &ZoneDetails) -> Result<()> {
    match details {
        ZoneDetails::Crop(crop) => {
            if crop.crop_type.trim().is_empty() {
                return Err(Error::validation("crop_type", "Crop type is required"));
            }
        }
        ZoneDetails::WaterWell(well) => {
            if !(well.depth.is_finite() && well.depth > 0.0) {
                return Err(Error::validation("depth", "Well depth must be positive"));
            }
            if !(well.well_diameter.is_finite() && well.well_diameter > 0.0) {
                return Err(Error::validation("well_diameter", "Well diameter must be positive"));
            }
        }
    }
    Ok(())
}

fn validate_shape(color: &str, geometry: &serde_json::Value, area: Option<f64>) -> Result<ZoneColor> {
    let color = color
        .parse::<ZoneColor>()
        .map_err(|_| Error::validation("color", "Invalid color selected"))?;
    if !geometry.is_object() {
        return Err(Error::validation("geometry", "Geometry must be a GeoJSON object"));
    }
    if let Some(area) = area {
        if !area.is_finite() || area < 0.0 {
            return Err(Error::validation("area", "Area must be a non-negative number"));
        }
    }
    Ok(color)
}

/// Zones visible on the user's dashboard
pub async fn list_zones(db: &DbPool, user: &User) -> Result<Vec<ZoneResponse>> {
    let scope = Scope::dashboard(user);
    let zones: Vec<Zone> = sqlx::query_as(
        r#"
        SELECT * FROM zones
        WHERE (? IS NULL OR organization_id = ?) AND (? IS NULL OR project_id = ?)
        ORDER BY created_at ASC
        "#,
    )
    .bind(&scope.organization_id)
    .bind(&scope.organization_id)
    .bind(&scope.project_id)
    .bind(&scope.project_id)
    .fetch_all(db)
    .await?;
    Ok(zones.into_iter().map(ZoneResponse::from).collect())
}

pub(super) async fn fetch_zone(db: &DbPool, user: &User, zone_id: &str) -> Result<Zone> {
    let zone: Zone = sqlx::query_as("SELECT * FROM zones WHERE id = ?")
        .bind(zone_id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("Zone"))?;
    ensure_owned(user, &zone.organization_id, "Zone")?;
    Ok(zone)
}

pub async fn get_zone(db: &DbPool, user: &User, zone_id: &str) -> Result<ZoneWithDevices> {
    let zone = fetch_zone(db, user, zone_id).await?;
    let devices: Vec<Device> = sqlx::query_as("SELECT * FROM devices WHERE zone_id = ? ORDER BY number ASC, eui ASC")
        .bind(&zone.id)
        .fetch_all(db)
        .await?;
    Ok(ZoneWithDevices {
        zone: ZoneResponse::from(zone),
        devices,
    })
}

pub async fn create_zone(state: &AppState, user: &User, request: CreateZoneRequest) -> Result<ZoneWithDevices> {
    require_write(user)?;
    let color = validate_shape(&request.color, &request.geometry, request.area)?;
    validate_details(&request.details)?;

    let project_id = request
        .project_id
        .clone()
        .or_else(|| user.active_project_id.clone())
        .ok_or_else(|| Error::validation("project_id", "Select or create a project first"))?;
    let project = super::projects::get_project(&state.db, user, &project_id).await?;

    state
        .quotas
        .check(&state.db, &project.organization_id, ResourceKind::Zone)
        .await?;

    let euis: Vec<String> = request
        .device_euis
        .iter()
        .map(|eui| crate::ingest::classifier::normalize_eui(eui))
        .filter(|eui| !eui.is_empty())
        .collect();
    if !euis.is_empty() {
        state
            .quotas
            .check_additional(&state.db, &project.organization_id, ResourceKind::Device, euis.len() as i64)
            .await?;
    }

    let now = db::now();
    let zone_id = Uuid::new_v4().to_string();
    let columns = DetailColumns::from(&request.details);

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO zones (id, organization_id, project_id, name, geometry, area, color, zone_type,
            crop_type, planting_date, harvest_date, soil_type, notes,
            well_depth, well_diameter, well_construction_date, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&zone_id)
    .bind(&project.organization_id)
    .bind(&project.id)
    .bind(request.name.trim())
    .bind(request.geometry.to_string())
    .bind(request.area)
    .bind(color.as_str())
    .bind(request.details.zone_type())
    .bind(&columns.crop_type)
    .bind(&columns.planting_date)
    .bind(&columns.harvest_date)
    .bind(&columns.soil_type)
    .bind(&columns.notes)
    .bind(columns.well_depth)
    .bind(columns.well_diameter)
    .bind(&columns.well_construction_date)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for eui in &euis {
        let assigned = sqlx::query(
            "UPDATE devices SET zone_id = ?, updated_at = ? WHERE eui = ? AND zone_id IS NULL",
        )
        .bind(&zone_id)
        .bind(&now)
        .bind(eui)
        .execute(&mut *tx)
        .await?;
        if assigned.rows_affected() != 1 {
            let exists: Option<String> = sqlx::query_scalar("SELECT id FROM devices WHERE eui = ?")
                .bind(eui)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => Error::Conflict(format!("Device {} is already assigned to a zone", eui)),
                None => Error::validation("device_euis", format!("Device {} has not reported yet", eui)),
            });
        }
    }
    tx.commit().await?;

    info!(zone_id = %zone_id, project_id = %project.id, devices = euis.len(), "Zone created");
    get_zone(&state.db, user, &zone_id).await
}

pub async fn update_zone(
    db: &DbPool,
    user: &User,
    zone_id: &str,
    request: UpdateZoneRequest,
) -> Result<ZoneResponse> {
    require_write(user)?;
    let zone = fetch_zone(db, user, zone_id).await?;
    let color = validate_shape(&request.color, &request.geometry, request.area)?;
    validate_details(&request.details)?;

    let columns = DetailColumns::from(&request.details);
    sqlx::query(
        r#"
        UPDATE zones SET name = ?, geometry = ?, area = ?, color = ?, zone_type = ?,
            crop_type = ?, planting_date = ?, harvest_date = ?, soil_type = ?, notes = ?,
            well_depth = ?, well_diameter = ?, well_construction_date = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(request.name.trim())
    .bind(request.geometry.to_string())
    .bind(request.area)
    .bind(color.as_str())
    .bind(request.details.zone_type())
    .bind(&columns.crop_type)
    .bind(&columns.planting_date)
    .bind(&columns.harvest_date)
    .bind(&columns.soil_type)
    .bind(&columns.notes)
    .bind(columns.well_depth)
    .bind(columns.well_diameter)
    .bind(&columns.well_construction_date)
    .bind(db::now())
    .bind(&zone.id)
    .execute(db)
    .await?;

    info!(zone_id = %zone.id, "Zone updated");
    let zone = fetch_zone(db, user, &zone.id).await?;
    Ok(ZoneResponse::from(zone))
}

/// Delete a zone. Its devices stay registered but become unassigned.
pub async fn delete_zone(db: &DbPool, user: &User, zone_id: &str) -> Result<()> {
    require_write(user)?;
    let zone = fetch_zone(db, user, zone_id).await?;

    let mut tx = db.begin().await?;
    sqlx::query("UPDATE devices SET zone_id = NULL, updated_at = ? WHERE zone_id = ?")
        .bind(db::now())
        .bind(&zone.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM zones WHERE id = ?")
        .bind(&zone.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(zone_id = %zone.id, "Zone deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CropDetails, Role, WaterWellDetails};
    use crate::services::fixtures;
    use serde_json::json;

    fn crop_request(project_id: Option<&str>) -> CreateZoneRequest {
        CreateZoneRequest {
            name: "Tomato block".to_string(),
            geometry: json!({"type": "Polygon", "coordinates": [[[0, 0], [0, 1], [1, 1], [0, 0]]]}),
            area: Some(2.5),
            color: "PASTEL_PINK".to_string(),
            details: ZoneDetails::Crop(CropDetails {
                crop_type: "Tomato".to_string(),
                planting_date: Some("2024-03-01".to_string()),
                harvest_date: None,
                soil_type: Some("Loam".to_string()),
                notes: None,
            }),
            project_id: project_id.map(str::to_string),
            device_euis: Vec::new(),
        }
    }

    fn well_details() -> ZoneDetails {
        ZoneDetails::WaterWell(WaterWellDetails {
            depth: 85.0,
            well_diameter: 0.3,
            construction_date: Some("2018-11-20".to_string()),
        })
    }

    async fn seeded() -> (AppState, User) {
        let (state, _) = fixtures::state().await;
        fixtures::organization(&state.db, "org-1", "FREE").await;
        fixtures::project(&state.db, "p-1", "org-1").await;
        let admin = fixtures::user(&state.db, "u-1", "org-1", Role::Admin, Some("p-1")).await;
        (state, admin)
    }

    #[tokio::test]
    async fn test_water_well_round_trip() {
        let (state, admin) = seeded().await;
        let mut request = crop_request(None);
        request.details = well_details();

        let created = create_zone(&state, &admin, request).await.unwrap();
        let loaded = get_zone(&state.db, &admin, &created.zone.id).await.unwrap();
        assert_eq!(loaded.zone.details, well_details());
        assert!(loaded.zone.details.crop().is_none());

        let row: Zone = sqlx::query_as("SELECT * FROM zones WHERE id = ?")
            .bind(&created.zone.id)
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert!(row.crop_type.is_none());
        assert!(row.soil_type.is_none());
        assert!(row.planting_date.is_none());
    }

    #[tokio::test]
    async fn test_switching_type_clears_other_fields() {
        let (state, admin) = seeded().await;
        let created = create_zone(&state, &admin, crop_request(None)).await.unwrap();

        let updated = update_zone(
            &state.db,
            &admin,
            &created.zone.id,
            UpdateZoneRequest {
                name: "Old well".to_string(),
                geometry: json!({"type": "Point", "coordinates": [0, 0]}),
                area: None,
                color: "PASTEL_BLUE".to_string(),
                details: well_details(),
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.details.zone_type(), "WATER_WELL");
        assert_eq!(updated.color, "PASTEL_BLUE");

        let row: Zone = sqlx::query_as("SELECT * FROM zones WHERE id = ?")
            .bind(&created.zone.id)
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert!(row.crop_type.is_none());
        assert_eq!(row.well_depth, Some(85.0));
    }

    #[tokio::test]
    async fn test_viewer_cannot_create_zone() {
        let (state, _) = seeded().await;
        let viewer = fixtures::user(&state.db, "u-2", "org-1", Role::Viewer, Some("p-1")).await;
        let err = create_zone(&state, &viewer, crop_request(None)).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        // Same answer even for a project in another organization
        fixtures::organization(&state.db, "org-2", "FREE").await;
        fixtures::project(&state.db, "p-2", "org-2").await;
        let err = create_zone(&state, &viewer, crop_request(Some("p-2"))).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_invalid_color_and_details() {
        let (state, admin) = seeded().await;
        let mut request = crop_request(None);
        request.color = "NEON_RED".to_string();
        assert!(matches!(
            create_zone(&state, &admin, request).await,
            Err(Error::Validation { ref field, .. }) if field == "color"
        ));

        let mut request = crop_request(None);
        request.details = ZoneDetails::WaterWell(WaterWellDetails {
            depth: -3.0,
            well_diameter: 0.3,
            construction_date: None,
        });
        assert!(matches!(
            create_zone(&state, &admin, request).await,
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_zone_quota() {
        let (state, admin) = seeded().await;
        for _ in 0..5 {
            create_zone(&state, &admin, crop_request(None)).await.unwrap();
        }
        assert!(matches!(
            create_zone(&state, &admin, crop_request(None)).await,
            Err(Error::QuotaExceeded { kind: ResourceKind::Zone, limit: 5 })
        ));
    }

    #[tokio::test]
    async fn test_other_tenant_zone_is_not_found() {
        let (state, admin) = seeded().await;
        fixtures::organization(&state.db, "org-2", "FREE").await;
        fixtures::project(&state.db, "p-2", "org-2").await;
        fixtures::zone(&state.db, "z-other", "org-2", "p-2").await;

        assert!(matches!(get_zone(&state.db, &admin, "z-other").await, Err(Error::NotFound("Zone"))));
        assert!(matches!(delete_zone(&state.db, &admin, "z-other").await, Err(Error::NotFound("Zone"))));
        assert!(matches!(
            create_zone(&state, &admin, crop_request(Some("p-2"))).await,
            Err(Error::NotFound("Project"))
        ));
    }

    #[tokio::test]
    async fn test_super_admin_zone_listing_follows_active_project() {
        let (state, _) = seeded().await;
        fixtures::organization(&state.db, "org-2", "FREE").await;
        fixtures::project(&state.db, "p-2", "org-2").await;
        fixtures::zone(&state.db, "z-1", "org-1", "p-1").await;
        fixtures::zone(&state.db, "z-2", "org-2", "p-2").await;

        let root = fixtures::user(&state.db, "root", "org-1", Role::SuperAdmin, None).await;
        let all = list_zones(&state.db, &root).await.unwrap();
        assert_eq!(all.len(), 2);

        let pinned = fixtures::user(&state.db, "root-2", "org-1", Role::SuperAdmin, Some("p-2")).await;
        let scoped = list_zones(&state.db, &pinned).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "z-2");

        let member = fixtures::user(&state.db, "u-9", "org-1", Role::Viewer, None).await;
        let own = list_zones(&state.db, &member).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].id, "z-1");
    }

    #[tokio::test]
    async fn test_assign_devices_and_unassign_on_delete() {
        let (state, admin) = seeded().await;
        fixtures::device(&state.db, "24E124126C000001", None).await;
        fixtures::device(&state.db, "24E124126C000002", None).await;

        let mut request = crop_request(None);
        request.device_euis = vec!["24e124126c000001".to_string()];
        let created = create_zone(&state, &admin, request).await.unwrap();
        assert_eq!(created.devices.len(), 1);
        assert_eq!(created.devices[0].eui, "24E124126C000001");

        let mut request = crop_request(None);
        request.device_euis = vec!["24E124126C000001".to_string()];
        assert!(matches!(create_zone(&state, &admin, request).await, Err(Error::Conflict(_))));

        delete_zone(&state.db, &admin, &created.zone.id).await.unwrap();
        let zone_id: Option<String> = sqlx::query_scalar("SELECT zone_id FROM devices WHERE eui = '24E124126C000001'")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert!(zone_id.is_none());
    }
}
