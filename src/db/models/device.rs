//! Device models and the device lifecycle.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Sensor families known to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    #[serde(rename = "CO2_SENSOR")]
    Co2Sensor,
    SoilMoisture,
    LiquidLevel,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Co2Sensor => "CO2_SENSOR",
            DeviceType::SoilMoisture => "SOIL_MOISTURE",
            DeviceType::LiquidLevel => "LIQUID_LEVEL",
            DeviceType::Unknown => "UNKNOWN",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DeviceType::Unknown)
    }

    /// Payload fields that must all be present before a reading is stored
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            DeviceType::Co2Sensor => &["co2", "humidity", "pressure", "temperature"],
            DeviceType::SoilMoisture => &["moisture", "temperature", "ec"],
            DeviceType::LiquidLevel => &["liquid_level", "temperature"],
            DeviceType::Unknown => &[],
        }
    }

    /// Placeholder model name for devices created by ingestion
    pub fn default_model_name(&self) -> &'static str {
        match self {
            DeviceType::Co2Sensor => "CO2 Sensor",
            DeviceType::SoilMoisture => "Soil Moisture Sensor",
            DeviceType::LiquidLevel => "Liquid Level Sensor",
            DeviceType::Unknown => "Unknown Device",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CO2_SENSOR" => Ok(DeviceType::Co2Sensor),
            "SOIL_MOISTURE" => Ok(DeviceType::SoilMoisture),
            "LIQUID_LEVEL" => Ok(DeviceType::LiquidLevel),
            "UNKNOWN" => Ok(DeviceType::Unknown),
            _ => Err(format!("Unknown device type: {}", s)),
        }
    }
}

impl From<String> for DeviceType {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(DeviceType::Unknown)
    }
}

/// Where a device sits in its lifecycle.
///
/// Ingestion only ever creates devices in one of the unassigned states;
/// `Assigned` is reached exclusively through an explicit registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    UnassignedUnknown,
    UnassignedTyped,
    Assigned,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: String,
    pub eui: String,
    pub device_type: String,
    pub name: String,
    pub model_name: String,
    pub number: Option<i64>,
    pub zone_id: Option<String>,
    pub installation_date: Option<String>,
    pub installed_depth: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reporting_interval: Option<i64>,
    pub last_seen: Option<String>,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    pub battery: Option<f64>,
    pub latest_reading_at: Option<String>,
    pub latest_co2: Option<f64>,
    pub latest_humidity: Option<f64>,
    pub latest_pressure: Option<f64>,
    pub latest_temperature: Option<f64>,
    pub latest_moisture: Option<f64>,
    pub latest_ec: Option<f64>,
    pub latest_liquid_level: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Device {
    pub fn type_enum(&self) -> DeviceType {
        DeviceType::from(self.device_type.clone())
    }

    pub fn state(&self) -> DeviceState {
        match (&self.zone_id, self.type_enum()) {
            (Some(_), _) => DeviceState::Assigned,
            (None, DeviceType::Unknown) => DeviceState::UnassignedUnknown,
            (None, _) => DeviceState::UnassignedTyped,
        }
    }
}

// DTOs for API

#[derive(Debug, Deserialize)]
pub struct CreateDeviceRequest {
    pub eui: String,
    pub zone_id: String,
    pub name: String,
    pub model_name: Option<String>,
    pub installation_date: Option<String>,
    pub installed_depth: Option<f64>,
    /// `"lat,lng"`
    pub location: Option<String>,
    pub reporting_interval: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDeviceRequest {
    pub name: Option<String>,
    pub model_name: Option<String>,
    pub installation_date: Option<String>,
    pub installed_depth: Option<f64>,
    pub location: Option<String>,
    pub reporting_interval: Option<i64>,
    /// Manual reclassification
    pub device_type: Option<String>,
}
