//! Device registration and management.
//!
//! Ingestion only ever creates unassigned devices. Assigning one to a zone is
//! an explicit admin action, and is the only way a device enters a tenant.

use tracing::info;
use uuid::Uuid;

use crate::auth::{ensure_owned, require_role, require_write, Scope};
use crate::db::{self, CreateDeviceRequest, DbPool, Device, DeviceType, Role, UpdateDeviceRequest, User};
use crate::error::{Error, ResourceKind, Result};
use crate::ingest::classifier::normalize_eui;
use crate::AppState;

/// Parse a `"lat,lng"` pair
pub fn parse_location(location: &str) -> Result<(f64, f64)> {
    let invalid = || Error::validation("location", "Location must be \"latitude,longitude\"");
    let (lat, lng) = location.split_once(',').ok_or_else(invalid)?;
    let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
    let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(Error::validation("location", "Coordinates are out of range"));
    }
    Ok((lat, lng))
}

fn parse_optional_location(location: Option<&str>) -> Result<(Option<f64>, Option<f64>)> {
    match location.map(str::trim).filter(|l| !l.is_empty()) {
        Some(location) => parse_location(location).map(|(lat, lng)| (Some(lat), Some(lng))),
        None => Ok((None, None)),
    }
}

/// Devices assigned to zones visible on the user's dashboard. Unassigned
/// devices only show up for an unrestricted SUPER_ADMIN.
pub async fn list_devices(db: &DbPool, user: &User) -> Result<Vec<Device>> {
    let scope = Scope::dashboard(user);
    let devices = sqlx::query_as(
        r#"
        SELECT d.* FROM devices d
        LEFT JOIN zones z ON z.id = d.zone_id
        WHERE (? IS NULL OR z.organization_id = ?) AND (? IS NULL OR z.project_id = ?)
        ORDER BY d.device_type ASC, d.number ASC, d.eui ASC
        "#,
    )
    .bind(&scope.organization_id)
    .bind(&scope.organization_id)
    .bind(&scope.project_id)
    .bind(&scope.project_id)
    .fetch_all(db)
    .await?;
    Ok(devices)
}

async fn find_device(db: &DbPool, eui: &str) -> Result<Option<Device>> {
    let device = sqlx::query_as("SELECT * FROM devices WHERE eui = ?")
        .bind(normalize_eui(eui))
        .fetch_optional(db)
        .await?;
    Ok(device)
}

async fn zone_organization(db: &DbPool, zone_id: &str) -> Result<Option<String>> {
    let organization_id = sqlx::query_scalar("SELECT organization_id FROM zones WHERE id = ?")
        .bind(zone_id)
        .fetch_optional(db)
        .await?;
    Ok(organization_id)
}

/// Fetch a device by EUI.
///
/// An assigned device belongs to its zone's organization. An unassigned
/// device belongs to nobody yet and is addressable by any ADMIN so it can be
/// looked up before registration.
pub async fn get_device(db: &DbPool, user: &User, eui: &str) -> Result<Device> {
    let device = find_device(db, eui).await?.ok_or(Error::NotFound("Device"))?;
    match device.zone_id.as_deref() {
        Some(zone_id) => {
            let organization_id = zone_organization(db, zone_id)
                .await?
                .ok_or(Error::NotFound("Device"))?;
            ensure_owned(user, &organization_id, "Device")?;
        }
        None if user.role_enum().at_least(Role::Admin) => {}
        None => return Err(Error::NotFound("Device")),
    }
    Ok(device)
}

/// Fetch a device the caller may change. Unassigned devices belong to no
/// organization, so only SUPER_ADMIN may edit or remove them; tenants claim
/// them through registration.
async fn fetch_for_change(db: &DbPool, user: &User, eui: &str) -> Result<Device> {
    let device = get_device(db, user, eui).await?;
    if device.zone_id.is_none() {
        require_role(user, Role::SuperAdmin)?;
    }
    Ok(device)
}

/// Next free per-type device number within an organization
async fn next_number(db: &DbPool, organization_id: &str, device_type: DeviceType) -> Result<i64> {
    let current: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT MAX(d.number) FROM devices d
        JOIN zones z ON z.id = d.zone_id
        WHERE z.organization_id = ? AND d.device_type = ?
        "#,
    )
    .bind(organization_id)
    .bind(device_type.as_str())
    .fetch_one(db)
    .await?;
    Ok(current.unwrap_or(0) + 1)
}

/// Register a device into a zone.
///
/// An EUI that already reported is assigned in place; an EUI never seen
/// before is created with its classified type. A device that is already in a
/// zone is a conflict, whoever owns it.
pub async fn create_device(state: &AppState, user: &User, request: CreateDeviceRequest) -> Result<Device> {
    require_write(user)?;
    let eui = normalize_eui(&request.eui);
    if eui.is_empty() {
        return Err(Error::validation("eui", "Device EUI is required"));
    }
    let (latitude, longitude) = parse_optional_location(request.location.as_deref())?;
    let zone = super::zones::fetch_zone(&state.db, user, &request.zone_id).await?;

    let existing = find_device(&state.db, &eui).await?;
    if existing.as_ref().is_some_and(|d| d.zone_id.is_some()) {
        return Err(Error::Conflict(format!("Device {} is already registered", eui)));
    }

    state
        .quotas
        .check(&state.db, &zone.organization_id, ResourceKind::Device)
        .await?;

    let device_type = match existing.as_ref().map(Device::type_enum) {
        Some(known) if known.is_known() => known,
        _ => state.classifier.classify(&eui),
    };
    let number = next_number(&state.db, &zone.organization_id, device_type).await?;
    let model_name = request
        .model_name
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(device_type.default_model_name())
        .to_string();
    let now = db::now();

    // Assign-in-place only succeeds while the row is still unassigned
    let result = sqlx::query(
        r#"
        INSERT INTO devices (id, eui, device_type, name, model_name, number, zone_id,
            installation_date, installed_depth, latitude, longitude, reporting_interval,
            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(eui) DO UPDATE SET
            device_type = excluded.device_type,
            name = excluded.name,
            model_name = excluded.model_name,
            number = excluded.number,
            zone_id = excluded.zone_id,
            installation_date = excluded.installation_date,
            installed_depth = excluded.installed_depth,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            reporting_interval = excluded.reporting_interval,
            updated_at = excluded.updated_at
        WHERE devices.zone_id IS NULL
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&eui)
    .bind(device_type.as_str())
    .bind(request.name.trim())
    .bind(&model_name)
    .bind(number)
    .bind(&zone.id)
    .bind(&request.installation_date)
    .bind(request.installed_depth)
    .bind(latitude)
    .bind(longitude)
    .bind(request.reporting_interval)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    if result.rows_affected() != 1 {
        return Err(Error::Conflict(format!("Device {} is already registered", eui)));
    }

    info!(
        eui = %eui,
        zone_id = %zone.id,
        device_type = %device_type,
        number,
        existed = existing.is_some(),
        "Device registered"
    );
    find_device(&state.db, &eui).await?.ok_or(Error::NotFound("Device"))
}

/// Edit a device's descriptive metadata. Setting `device_type` reclassifies
/// the device manually.
pub async fn update_device(db: &DbPool, user: &User, eui: &str, request: UpdateDeviceRequest) -> Result<Device> {
    require_write(user)?;
    let device = fetch_for_change(db, user, eui).await?;

    let device_type = match request.device_type.as_deref() {
        Some(raw) => Some(
            raw.parse::<DeviceType>()
                .map_err(|e| Error::validation("device_type", e))?,
        ),
        None => None,
    };
    let (latitude, longitude) = parse_optional_location(request.location.as_deref())?;

    sqlx::query(
        r#"
        UPDATE devices SET
            name = COALESCE(?, name),
            model_name = COALESCE(?, model_name),
            installation_date = COALESCE(?, installation_date),
            installed_depth = COALESCE(?, installed_depth),
            latitude = COALESCE(?, latitude),
            longitude = COALESCE(?, longitude),
            reporting_interval = COALESCE(?, reporting_interval),
            device_type = COALESCE(?, device_type),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(request.name.as_deref().map(str::trim))
    .bind(request.model_name.as_deref().map(str::trim))
    .bind(&request.installation_date)
    .bind(request.installed_depth)
    .bind(latitude)
    .bind(longitude)
    .bind(request.reporting_interval)
    .bind(device_type.map(|t| t.as_str()))
    .bind(db::now())
    .bind(&device.id)
    .execute(db)
    .await?;

    if let Some(device_type) = device_type.filter(|t| t.as_str() != device.device_type) {
        info!(eui = %device.eui, from = %device.device_type, to = %device_type, "Device reclassified");
    }
    find_device(db, &device.eui).await?.ok_or(Error::NotFound("Device"))
}

/// Remove a device record. Its readings are keyed by EUI and stay in place.
pub async fn delete_device(db: &DbPool, user: &User, eui: &str) -> Result<()> {
    require_write(user)?;
    let device = fetch_for_change(db, user, eui).await?;
    sqlx::query("DELETE FROM devices WHERE id = ?")
        .bind(&device.id)
        .execute(db)
        .await?;
    info!(eui = %device.eui, "Device deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DeviceState;
    use crate::services::fixtures;

    const SOIL_EUI: &str = "24E124126C000001";
    const AIR_EUI: &str = "24E124126E000001";

    fn register(eui: &str, zone_id: &str) -> CreateDeviceRequest {
        CreateDeviceRequest {
            eui: eui.to_string(),
            zone_id: zone_id.to_string(),
            name: "Probe".to_string(),
            model_name: None,
            installation_date: Some("2024-04-02".to_string()),
            installed_depth: Some(0.3),
            location: Some("5.6037, -0.1870".to_string()),
            reporting_interval: Some(600),
        }
    }

    async fn seeded() -> (AppState, User) {
        let (state, _) = fixtures::state().await;
        fixtures::organization(&state.db, "org-1", "FREE").await;
        fixtures::project(&state.db, "p-1", "org-1").await;
        fixtures::zone(&state.db, "z-1", "org-1", "p-1").await;
        let admin = fixtures::user(&state.db, "u-1", "org-1", Role::Admin, Some("p-1")).await;
        (state, admin)
    }

    #[test]
    fn test_parse_location() {
        assert_eq!(parse_location("5.6, -0.18").unwrap(), (5.6, -0.18));
        assert!(parse_location("5.6").is_err());
        assert!(parse_location("north,south").is_err());
        assert!(parse_location("95,0").is_err());
    }

    #[tokio::test]
    async fn test_register_new_device_uses_classified_type() {
        let (state, admin) = seeded().await;
        let device = create_device(&state, &admin, register("24e1-2412-6c00-0001", "z-1")).await.unwrap();
        assert_eq!(device.eui, SOIL_EUI);
        assert_eq!(device.type_enum(), DeviceType::SoilMoisture);
        assert_eq!(device.state(), DeviceState::Assigned);
        assert_eq!(device.number, Some(1));
        assert_eq!(device.latitude, Some(5.6037));
        assert_eq!(device.model_name, "Soil Moisture Sensor");
    }

    #[tokio::test]
    async fn test_register_assigns_discovered_device_once() {
        let (state, admin) = seeded().await;
        fixtures::device(&state.db, SOIL_EUI, None).await;

        let device = create_device(&state, &admin, register(SOIL_EUI, "z-1")).await.unwrap();
        assert_eq!(device.zone_id.as_deref(), Some("z-1"));
        assert_eq!(device.name, "Probe");

        let err = create_device(&state, &admin, register(SOIL_EUI, "z-1")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_numbers_are_per_type() {
        let (state, admin) = seeded().await;
        let a = create_device(&state, &admin, register(SOIL_EUI, "z-1")).await.unwrap();
        let b = create_device(&state, &admin, register("24E124126C000002", "z-1")).await.unwrap();
        let c = create_device(&state, &admin, register(AIR_EUI, "z-1")).await.unwrap();
        assert_eq!((a.number, b.number, c.number), (Some(1), Some(2), Some(1)));
    }

    #[tokio::test]
    async fn test_viewer_and_foreign_zone() {
        let (state, _) = seeded().await;
        let viewer = fixtures::user(&state.db, "u-2", "org-1", Role::Viewer, Some("p-1")).await;
        assert!(matches!(
            create_device(&state, &viewer, register(SOIL_EUI, "z-1")).await,
            Err(Error::Forbidden(_))
        ));

        fixtures::organization(&state.db, "org-2", "FREE").await;
        let outsider = fixtures::user(&state.db, "u-3", "org-2", Role::Admin, None).await;
        assert!(matches!(
            create_device(&state, &outsider, register(SOIL_EUI, "z-1")).await,
            Err(Error::NotFound("Zone"))
        ));
    }

    #[tokio::test]
    async fn test_device_quota() {
        let (state, admin) = seeded().await;
        for i in 0..10 {
            let eui = format!("24E124126C0000{:02}", i);
            create_device(&state, &admin, register(&eui, "z-1")).await.unwrap();
        }
        assert!(matches!(
            create_device(&state, &admin, register("24E124126C0000AA", "z-1")).await,
            Err(Error::QuotaExceeded { kind: ResourceKind::Device, limit: 10 })
        ));
    }

    #[tokio::test]
    async fn test_listing_scope() {
        let (state, admin) = seeded().await;
        fixtures::organization(&state.db, "org-2", "FREE").await;
        fixtures::project(&state.db, "p-2", "org-2").await;
        fixtures::zone(&state.db, "z-2", "org-2", "p-2").await;
        fixtures::device(&state.db, SOIL_EUI, Some("z-1")).await;
        fixtures::device(&state.db, "24E124126C000002", Some("z-2")).await;
        fixtures::device(&state.db, AIR_EUI, None).await;

        let own = list_devices(&state.db, &admin).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].eui, SOIL_EUI);

        let root = fixtures::user(&state.db, "root", "org-1", Role::SuperAdmin, None).await;
        assert_eq!(list_devices(&state.db, &root).await.unwrap().len(), 3);

        assert!(matches!(
            get_device(&state.db, &admin, "24E124126C000002").await,
            Err(Error::NotFound("Device"))
        ));
        // Unassigned devices can be looked up before registration
        get_device(&state.db, &admin, AIR_EUI).await.unwrap();
        let viewer = fixtures::user(&state.db, "u-2", "org-1", Role::Viewer, None).await;
        assert!(get_device(&state.db, &viewer, AIR_EUI).await.is_err());
    }

    #[tokio::test]
    async fn test_update_reclassifies_and_delete_keeps_readings() {
        let (state, admin) = seeded().await;
        fixtures::device(&state.db, "A84041000000BEEF", Some("z-1")).await;
        sqlx::query(
            "INSERT INTO liquid_readings (device_eui, received_at, liquid_level, temperature) VALUES ('A84041000000BEEF', ?, 1.2, 20.0)",
        )
        .bind(db::now())
        .execute(&state.db)
        .await
        .unwrap();

        let updated = update_device(
            &state.db,
            &admin,
            "a84041000000beef",
            UpdateDeviceRequest {
                name: Some("Tank 1".to_string()),
                model_name: None,
                installation_date: None,
                installed_depth: None,
                location: None,
                reporting_interval: Some(300),
                device_type: Some("LIQUID_LEVEL".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.type_enum(), DeviceType::LiquidLevel);
        assert_eq!(updated.name, "Tank 1");
        assert_eq!(updated.reporting_interval, Some(300));

        let bad = UpdateDeviceRequest {
            name: None,
            model_name: None,
            installation_date: None,
            installed_depth: None,
            location: None,
            reporting_interval: None,
            device_type: Some("RAIN_GAUGE".to_string()),
        };
        assert!(matches!(
            update_device(&state.db, &admin, "A84041000000BEEF", bad).await,
            Err(Error::Validation { .. })
        ));

        delete_device(&state.db, &admin, "A84041000000BEEF").await.unwrap();
        let readings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM liquid_readings WHERE device_eui = 'A84041000000BEEF'")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(readings, 1);
    }

    fn reclassify(device_type: &str) -> UpdateDeviceRequest {
        UpdateDeviceRequest {
            name: Some("Renamed".to_string()),
            model_name: None,
            installation_date: None,
            installed_depth: None,
            location: None,
            reporting_interval: None,
            device_type: Some(device_type.to_string()),
        }
    }

    #[tokio::test]
    async fn test_unassigned_device_cannot_be_changed_by_tenant() {
        let (state, admin) = seeded().await;
        fixtures::device(&state.db, SOIL_EUI, None).await;
        fixtures::organization(&state.db, "org-9", "FREE").await;
        let outsider = fixtures::user(&state.db, "u-9", "org-9", Role::Admin, None).await;

        assert!(matches!(
            update_device(&state.db, &outsider, SOIL_EUI, reclassify("CO2_SENSOR")).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            delete_device(&state.db, &outsider, SOIL_EUI).await,
            Err(Error::Forbidden(_))
        ));

        let device = find_device(&state.db, SOIL_EUI).await.unwrap().unwrap();
        assert_eq!(device.type_enum(), DeviceType::SoilMoisture);
        assert_ne!(device.name, "Renamed");

        assert!(matches!(
            delete_device(&state.db, &admin, SOIL_EUI).await,
            Err(Error::Forbidden(_))
        ));

        // Registration into one of the tenant's zones is how it is claimed
        let claimed = create_device(&state, &admin, register(SOIL_EUI, "z-1")).await.unwrap();
        assert_eq!(claimed.zone_id.as_deref(), Some("z-1"));
    }

    #[tokio::test]
    async fn test_super_admin_can_change_unassigned_device() {
        let (state, _) = seeded().await;
        fixtures::device(&state.db, SOIL_EUI, None).await;
        let root = fixtures::user(&state.db, "root", "org-1", Role::SuperAdmin, None).await;

        let updated = update_device(&state.db, &root, SOIL_EUI, reclassify("CO2_SENSOR")).await.unwrap();
        assert_eq!(updated.type_enum(), DeviceType::Co2Sensor);
        delete_device(&state.db, &root, SOIL_EUI).await.unwrap();
        assert!(find_device(&state.db, SOIL_EUI).await.unwrap().is_none());
    }
}
