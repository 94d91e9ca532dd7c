//! Append-only telemetry readings.
//!
//! Readings reference their device by EUI rather than by internal id so that
//! the history survives edits to, or removal of, the device record.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::device::DeviceType;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AirReading {
    pub id: i64,
    pub device_eui: String,
    pub received_at: String,
    pub co2: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub temperature: f64,
    pub battery: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SoilReading {
    pub id: i64,
    pub device_eui: String,
    pub received_at: String,
    pub moisture: f64,
    pub temperature: f64,
    pub ec: f64,
    pub battery: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LiquidReading {
    pub id: i64,
    pub device_eui: String,
    pub received_at: String,
    pub liquid_level: f64,
    pub temperature: f64,
    pub battery: Option<f64>,
}

/// A reading series for one device, shaped by the device's type
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Readings {
    Air(Vec<AirReading>),
    Soil(Vec<SoilReading>),
    Liquid(Vec<LiquidReading>),
}

impl Readings {
    pub fn len(&self) -> usize {
        match self {
            Readings::Air(r) => r.len(),
            Readings::Soil(r) => r.len(),
            Readings::Liquid(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Values for a reading about to be written
#[derive(Debug, Clone, PartialEq)]
pub enum NewReading {
    Air {
        co2: f64,
        humidity: f64,
        pressure: f64,
        temperature: f64,
    },
    Soil {
        moisture: f64,
        temperature: f64,
        ec: f64,
    },
    Liquid {
        liquid_level: f64,
        temperature: f64,
    },
}

impl NewReading {
    pub fn device_type(&self) -> DeviceType {
        match self {
            NewReading::Air { .. } => DeviceType::Co2Sensor,
            NewReading::Soil { .. } => DeviceType::SoilMoisture,
            NewReading::Liquid { .. } => DeviceType::LiquidLevel,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            NewReading::Air { .. } => "air_readings",
            NewReading::Soil { .. } => "soil_readings",
            NewReading::Liquid { .. } => "liquid_readings",
        }
    }
}
