//! Zone (field) models.
//!
//! A zone carries exactly one type-specific payload: crop details or water
//! well details. Both live in nullable columns of the same row; writers always
//! clear the group that does not belong to the zone's type.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::device::Device;
use super::project::parse_json_column;

/// Display colors accepted for zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneColor {
    PastelPink,
    PastelOrange,
    PastelYellow,
    PastelGreen,
    PastelBlue,
    PastelPurple,
}

impl ZoneColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneColor::PastelPink => "PASTEL_PINK",
            ZoneColor::PastelOrange => "PASTEL_ORANGE",
            ZoneColor::PastelYellow => "PASTEL_YELLOW",
            ZoneColor::PastelGreen => "PASTEL_GREEN",
            ZoneColor::PastelBlue => "PASTEL_BLUE",
            ZoneColor::PastelPurple => "PASTEL_PURPLE",
        }
    }
}

impl std::str::FromStr for ZoneColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASTEL_PINK" => Ok(ZoneColor::PastelPink),
            "PASTEL_ORANGE" => Ok(ZoneColor::PastelOrange),
            "PASTEL_YELLOW" => Ok(ZoneColor::PastelYellow),
            "PASTEL_GREEN" => Ok(ZoneColor::PastelGreen),
            "PASTEL_BLUE" => Ok(ZoneColor::PastelBlue),
            "PASTEL_PURPLE" => Ok(ZoneColor::PastelPurple),
            _ => Err(format!("Invalid zone color: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropDetails {
    pub crop_type: String,
    pub planting_date: Option<String>,
    pub harvest_date: Option<String>,
    pub soil_type: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterWellDetails {
    pub depth: f64,
    pub well_diameter: f64,
    pub construction_date: Option<String>,
}

/// Type-specific zone payload, tagged by `zone_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "zone_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneDetails {
    Crop(CropDetails),
    WaterWell(WaterWellDetails),
}

impl ZoneDetails {
    pub fn zone_type(&self) -> &'static str {
        match self {
            ZoneDetails::Crop(_) => "CROP",
            ZoneDetails::WaterWell(_) => "WATER_WELL",
        }
    }

    pub fn crop(&self) -> Option<&CropDetails> {
        match self {
            ZoneDetails::Crop(crop) => Some(crop),
            ZoneDetails::WaterWell(_) => None,
        }
    }

    pub fn water_well(&self) -> Option<&WaterWellDetails> {
        match self {
            ZoneDetails::WaterWell(well) => Some(well),
            ZoneDetails::Crop(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Zone {
    pub id: String,
    pub organization_id: String,
    pub project_id: String,
    pub name: String,
    pub geometry: String,
    pub area: Option<f64>,
    pub color: String,
    pub zone_type: String,
    pub crop_type: Option<String>,
    pub planting_date: Option<String>,
    pub harvest_date: Option<String>,
    pub soil_type: Option<String>,
    pub notes: Option<String>,
    pub well_depth: Option<f64>,
    pub well_diameter: Option<f64>,
    pub well_construction_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Zone {
    /// Rebuild the type-specific payload from the row.
    ///
    /// Only the columns of the zone's own type are read, so stale values in
    /// the other group can never leak out.
    pub fn details(&self) -> ZoneDetails {
        match self.zone_type.as_str() {
            "WATER_WELL" => ZoneDetails::WaterWell(WaterWellDetails {
                depth: self.well_depth.unwrap_or_default(),
                well_diameter: self.well_diameter.unwrap_or_default(),
                construction_date: self.well_construction_date.clone(),
            }),
            _ => ZoneDetails::Crop(CropDetails {
                crop_type: self.crop_type.clone().unwrap_or_default(),
                planting_date: self.planting_date.clone(),
                harvest_date: self.harvest_date.clone(),
                soil_type: self.soil_type.clone(),
                notes: self.notes.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneResponse {
    pub id: String,
    pub organization_id: String,
    pub project_id: String,
    pub name: String,
    pub geometry: Option<serde_json::Value>,
    pub area: Option<f64>,
    pub color: String,
    #[serde(flatten)]
    pub details: ZoneDetails,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Zone> for ZoneResponse {
    fn from(zone: Zone) -> Self {
        let details = zone.details();
        Self {
            geometry: parse_json_column(Some(&zone.geometry)),
            id: zone.id,
            organization_id: zone.organization_id,
            project_id: zone.project_id,
            name: zone.name,
            area: zone.area,
            color: zone.color,
            details,
            created_at: zone.created_at,
            updated_at: zone.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneWithDevices {
    #[serde(flatten)]
    pub zone: ZoneResponse,
    pub devices: Vec<Device>,
}

// DTOs for API

#[derive(Debug, Deserialize)]
pub struct CreateZoneRequest {
    pub name: String,
    pub geometry: serde_json::Value,
    pub area: Option<f64>,
    pub color: String,
    #[serde(flatten)]
    pub details: ZoneDetails,
    /// Defaults to the caller's active project
    pub project_id: Option<String>,
    /// EUIs of unassigned devices to place in the new zone
    #[serde(default)]
    pub device_euis: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateZoneRequest {
    pub name: String,
    pub geometry: serde_json::Value,
    pub area: Option<f64>,
    pub color: String,
    #[serde(flatten)]
    pub details: ZoneDetails,
}
