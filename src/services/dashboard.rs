//! Dashboard: the active project with its zones and their devices.

use std::collections::HashMap;

use serde::Serialize;

use crate::db::{DbPool, Device, Project, User, ZoneWithDevices};
use crate::error::Result;

#[derive(Debug, Serialize)]
pub struct DashboardCounts {
    pub zones: usize,
    pub devices: usize,
    /// Devices that have reported within their last day
    pub online_devices: usize,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub active_project: Option<Project>,
    pub projects: Vec<Project>,
    pub zones: Vec<ZoneWithDevices>,
    pub counts: DashboardCounts,
}

fn is_online(device: &Device, cutoff: &str) -> bool {
    device.last_seen.as_deref().is_some_and(|seen| seen >= cutoff)
}

pub async fn load_dashboard(db: &DbPool, user: &User) -> Result<Dashboard> {
    let projects = super::projects::list_projects(db, user).await?;
    let active_project = user
        .active_project_id
        .as_deref()
        .and_then(|id| projects.iter().find(|p| p.id == id).cloned());

    let zones = super::zones::list_zones(db, user).await?;
    let devices = super::devices::list_devices(db, user).await?;

    // Unassigned devices (listed for an unrestricted SUPER_ADMIN) are not counted
    let cutoff = crate::db::timestamp(chrono::Utc::now() - chrono::Duration::days(1));
    let assigned = || devices.iter().filter(|d| d.zone_id.is_some());
    let device_count = assigned().count();
    let online_devices = assigned().filter(|d| is_online(d, &cutoff)).count();

    let mut by_zone: HashMap<String, Vec<Device>> = HashMap::new();
    for device in devices {
        if let Some(zone_id) = device.zone_id.clone() {
            by_zone.entry(zone_id).or_default().push(device);
        }
    }

    let zones: Vec<ZoneWithDevices> = zones
        .into_iter()
        .map(|zone| ZoneWithDevices {
            devices: by_zone.remove(&zone.id).unwrap_or_default(),
            zone,
        })
        .collect();

    Ok(Dashboard {
        counts: DashboardCounts {
            zones: zones.len(),
            devices: device_count,
            online_devices,
        },
        active_project,
        projects,
        zones,
    })
}
