//! Telemetry ingestion: envelope → record → device shell → typed reading.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::classifier::DeviceClassifier;
use super::decoder::DecodedFields;
use super::envelope::{UplinkRecord, WebhookEnvelope};
use super::metrics::record_uplink;
use crate::db::{self, DbPool, DeviceType, NewReading};
use crate::error::{Error, Result};

/// Result of a successfully stored uplink
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub eui: String,
    pub device_type: DeviceType,
    pub received_at: String,
}

/// Ingest one webhook body.
///
/// The device shell (last seen, signal quality, battery) is recorded as soon
/// as the envelope yields an EUI, before any type or field validation, so a
/// rejected reading still leaves a trace of the device on the platform.
pub async fn ingest(
    pool: &DbPool,
    classifier: &DeviceClassifier,
    body: &[u8],
) -> Result<IngestOutcome> {
    let record = match WebhookEnvelope::parse(body).and_then(|env| env.into_record(Utc::now())) {
        Ok(record) => record,
        Err(e) => {
            record_uplink("invalid", "NONE");
            return Err(e);
        }
    };

    let device_type = upsert_device_shell(pool, classifier, &record).await?;

    let reading = match build_reading(device_type, &record.eui, &record.fields) {
        Ok(reading) => reading,
        Err(e) => {
            let outcome = match e {
                Error::UnknownDeviceType { .. } => "unknown_device_type",
                _ => "incomplete",
            };
            record_uplink(outcome, device_type.as_str());
            warn!(eui = %record.eui, device_type = %device_type, "Reading rejected: {}", e);
            return Err(e);
        }
    };

    let received_at = db::timestamp(record.received_at);
    store_reading(pool, &record, &reading, &received_at).await?;
    record_uplink("stored", device_type.as_str());

    debug!(eui = %record.eui, device_type = %device_type, received_at = %received_at, "Reading stored");

    Ok(IngestOutcome {
        eui: record.eui,
        device_type,
        received_at,
    })
}

/// Create the device if absent, otherwise refresh its liveness fields.
///
/// A device that already has a known type keeps it; only `UNKNOWN` devices
/// take the classifier's answer. Returns the type now stored for the device.
async fn upsert_device_shell(
    pool: &DbPool,
    classifier: &DeviceClassifier,
    record: &UplinkRecord,
) -> Result<DeviceType> {
    let classified = classifier.classify(&record.eui);
    let now = db::now();
    let last_seen = db::timestamp(record.received_at);

    let (stored_type, created_at): (String, String) = sqlx::query_as(
        r#"
        INSERT INTO devices (id, eui, device_type, name, model_name, last_seen, rssi, snr, battery, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(eui) DO UPDATE SET
            device_type = CASE WHEN devices.device_type = 'UNKNOWN' THEN excluded.device_type ELSE devices.device_type END,
            last_seen = excluded.last_seen,
            rssi = COALESCE(excluded.rssi, devices.rssi),
            snr = COALESCE(excluded.snr, devices.snr),
            battery = COALESCE(excluded.battery, devices.battery),
            updated_at = excluded.updated_at
        RETURNING device_type, created_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&record.eui)
    .bind(classified.as_str())
    .bind(&record.eui)
    .bind(classified.default_model_name())
    .bind(&last_seen)
    .bind(record.rssi)
    .bind(record.snr)
    .bind(record.battery)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    if created_at == now {
        info!(eui = %record.eui, device_type = %classified, "New device discovered");
    }

    Ok(DeviceType::from(stored_type))
}

fn required_number(fields: &DecodedFields, name: &str) -> Option<f64> {
    match fields.get(name)? {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Check the payload against the device type's schema and build the reading.
pub fn build_reading(device_type: DeviceType, eui: &str, fields: &DecodedFields) -> Result<NewReading> {
    if !device_type.is_known() {
        return Err(Error::UnknownDeviceType {
            eui: eui.to_string(),
        });
    }

    let missing: Vec<&'static str> = device_type
        .required_fields()
        .iter()
        .copied()
        .filter(|field| required_number(fields, field).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(Error::IncompleteSensorData {
            device_type,
            missing,
        });
    }

    let get = |name: &str| required_number(fields, name).unwrap_or_default();
    let reading = match device_type {
        DeviceType::Co2Sensor => NewReading::Air {
            co2: get("co2"),
            humidity: get("humidity"),
            pressure: get("pressure"),
            temperature: get("temperature"),
        },
        DeviceType::SoilMoisture => NewReading::Soil {
            moisture: get("moisture"),
            temperature: get("temperature"),
            ec: get("ec"),
        },
        DeviceType::LiquidLevel => NewReading::Liquid {
            liquid_level: get("liquid_level"),
            temperature: get("temperature"),
        },
        DeviceType::Unknown => {
            return Err(Error::UnknownDeviceType {
                eui: eui.to_string(),
            })
        }
    };
    Ok(reading)
}

/// Append the reading and refresh the device's latest snapshot in one transaction.
///
/// The snapshot only moves forward in time; a late retry of an older uplink is
/// appended to the history but leaves the snapshot alone.
async fn store_reading(
    pool: &DbPool,
    record: &UplinkRecord,
    reading: &NewReading,
    received_at: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let now = db::now();

    match *reading {
        NewReading::Air {
            co2,
            humidity,
            pressure,
            temperature,
        } => {
            sqlx::query(
                "INSERT INTO air_readings (device_eui, received_at, co2, humidity, pressure, temperature, battery) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.eui)
            .bind(received_at)
            .bind(co2)
            .bind(humidity)
            .bind(pressure)
            .bind(temperature)
            .bind(record.battery)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE devices SET latest_reading_at = ?, latest_co2 = ?, latest_humidity = ?,
                    latest_pressure = ?, latest_temperature = ?, updated_at = ?
                WHERE eui = ? AND (latest_reading_at IS NULL OR latest_reading_at <= ?)
                "#,
            )
            .bind(received_at)
            .bind(co2)
            .bind(humidity)
            .bind(pressure)
            .bind(temperature)
            .bind(&now)
            .bind(&record.eui)
            .bind(received_at)
            .execute(&mut *tx)
            .await?;
        }
        NewReading::Soil {
            moisture,
            temperature,
            ec,
        } => {
            sqlx::query(
                "INSERT INTO soil_readings (device_eui, received_at, moisture, temperature, ec, battery) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.eui)
            .bind(received_at)
            .bind(moisture)
            .bind(temperature)
            .bind(ec)
            .bind(record.battery)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE devices SET latest_reading_at = ?, latest_moisture = ?, latest_temperature = ?,
                    latest_ec = ?, updated_at = ?
                WHERE eui = ? AND (latest_reading_at IS NULL OR latest_reading_at <= ?)
                "#,
            )
            .bind(received_at)
            .bind(moisture)
            .bind(temperature)
            .bind(ec)
            .bind(&now)
            .bind(&record.eui)
            .bind(received_at)
            .execute(&mut *tx)
            .await?;
        }
        NewReading::Liquid {
            liquid_level,
            temperature,
        } => {
            sqlx::query(
                "INSERT INTO liquid_readings (device_eui, received_at, liquid_level, temperature, battery) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.eui)
            .bind(received_at)
            .bind(liquid_level)
            .bind(temperature)
            .bind(record.battery)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE devices SET latest_reading_at = ?, latest_liquid_level = ?, latest_temperature = ?,
                    updated_at = ?
                WHERE eui = ? AND (latest_reading_at IS NULL OR latest_reading_at <= ?)
                "#,
            )
            .bind(received_at)
            .bind(liquid_level)
            .bind(temperature)
            .bind(&now)
            .bind(&record.eui)
            .bind(received_at)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::db::{test_pool, Device};
    use serde_json::json;

    const CO2_EUI: &str = "24E124126E031234";
    const SOIL_EUI: &str = "24E124126C486336";

    fn classifier() -> DeviceClassifier {
        DeviceClassifier::new(&IngestConfig::default().device_prefixes)
    }

    fn body(eui: &str, payload: Value, received_at: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "data": {
                "end_device_ids": {"dev_eui": eui},
                "received_at": received_at,
                "uplink_message": {
                    "decoded_payload": payload,
                    "rx_metadata": [{"rssi": -91, "snr": 7.25}]
                }
            }
        }))
        .unwrap()
    }

    async fn device(pool: &DbPool, eui: &str) -> Device {
        sqlx::query_as("SELECT * FROM devices WHERE eui = ?")
            .bind(eui)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn count(pool: &DbPool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_co2_payload_stores_reading_and_snapshot() {
        let pool = test_pool().await;
        let payload = json!({"co2": 612, "humidity": 48.5, "pressure": 1009.7, "temperature": 22.4, "battery": 91});

        let outcome = ingest(&pool, &classifier(), &body(CO2_EUI, payload, "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome.device_type, DeviceType::Co2Sensor);
        assert_eq!(outcome.received_at, "2024-05-01T10:00:00.000Z");

        let rows: Vec<(f64, f64, f64, f64, Option<f64>)> = sqlx::query_as(
            "SELECT co2, humidity, pressure, temperature, battery FROM air_readings WHERE device_eui = ?",
        )
        .bind(CO2_EUI)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(rows, vec![(612.0, 48.5, 1009.7, 22.4, Some(91.0))]);

        let d = device(&pool, CO2_EUI).await;
        assert_eq!(d.type_enum(), DeviceType::Co2Sensor);
        assert_eq!(d.latest_co2, Some(612.0));
        assert_eq!(d.latest_humidity, Some(48.5));
        assert_eq!(d.latest_pressure, Some(1009.7));
        assert_eq!(d.latest_temperature, Some(22.4));
        assert_eq!(d.rssi, Some(-91.0));
        assert_eq!(d.snr, Some(7.25));
        assert!(d.zone_id.is_none());
    }

    #[tokio::test]
    async fn test_incomplete_payload_keeps_device_metadata() {
        let pool = test_pool().await;
        let payload = json!({"co2": 612, "humidity": 48.5, "temperature": 22.4, "battery": 64});

        let err = ingest(&pool, &classifier(), &body(CO2_EUI, payload, "2024-05-01T10:00:00Z"))
            .await
            .unwrap_err();
        match err {
            Error::IncompleteSensorData { device_type, missing } => {
                assert_eq!(device_type, DeviceType::Co2Sensor);
                assert_eq!(missing, vec!["pressure"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(count(&pool, "air_readings").await, 0);
        let d = device(&pool, CO2_EUI).await;
        assert_eq!(d.battery, Some(64.0));
        assert_eq!(d.rssi, Some(-91.0));
        assert_eq!(d.last_seen.as_deref(), Some("2024-05-01T10:00:00.000Z"));
        assert!(d.latest_co2.is_none());
    }

    #[tokio::test]
    async fn test_non_numeric_field_counts_as_missing() {
        let pool = test_pool().await;
        let payload = json!({"moisture": "wet", "temperature": 12.0, "ec": 80});
        let err = ingest(&pool, &classifier(), &body(SOIL_EUI, payload, "2024-05-01T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IncompleteSensorData { .. }));
        assert_eq!(count(&pool, "soil_readings").await, 0);
    }

    #[tokio::test]
    async fn test_unknown_device_creates_placeholder_shell() {
        let pool = test_pool().await;
        let eui = "647FDAFFFF01B013";
        let err = ingest(&pool, &classifier(), &body(eui, json!({"temperature": 3}), "2024-05-01T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDeviceType { .. }));

        let d = device(&pool, eui).await;
        assert_eq!(d.type_enum(), DeviceType::Unknown);
        assert_eq!(d.state(), crate::db::DeviceState::UnassignedUnknown);
        assert_eq!(count(&pool, "air_readings").await + count(&pool, "soil_readings").await, 0);
    }

    #[tokio::test]
    async fn test_known_type_is_authoritative() {
        let pool = test_pool().await;
        // Onboarded as a soil sensor despite a CO2 prefix
        ingest(&pool, &classifier(), &body(CO2_EUI, json!({"co2": 400}), "2024-05-01T09:00:00Z"))
            .await
            .unwrap_err();
        sqlx::query("UPDATE devices SET device_type = 'SOIL_MOISTURE' WHERE eui = ?")
            .bind(CO2_EUI)
            .execute(&pool)
            .await
            .unwrap();

        let payload = json!({"moisture": 30.0, "temperature": 15.0, "ec": 100});
        let outcome = ingest(&pool, &classifier(), &body(CO2_EUI, payload, "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome.device_type, DeviceType::SoilMoisture);
        assert_eq!(count(&pool, "soil_readings").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_device_is_reclassified_when_table_learns_it() {
        let pool = test_pool().await;
        let eui = "A84041000181C2D1";
        let empty = DeviceClassifier::new(&[]);
        ingest(&pool, &empty, &body(eui, json!({"liquid_level": 1.2, "temperature": 9.0}), "2024-05-01T09:00:00Z"))
            .await
            .unwrap_err();

        let learned = DeviceClassifier::new(&[crate::config::PrefixRule::new("A840", DeviceType::LiquidLevel)]);
        let outcome = ingest(&pool, &learned, &body(eui, json!({"liquid_level": 1.2, "temperature": 9.0}), "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome.device_type, DeviceType::LiquidLevel);
        assert_eq!(device(&pool, eui).await.latest_liquid_level, Some(1.2));
    }

    #[tokio::test]
    async fn test_duplicate_deliveries_are_idempotent_on_device() {
        let pool = test_pool().await;
        let payload = json!({"moisture": 30.0, "temperature": 15.0, "ec": 100});
        let bytes = body(SOIL_EUI, payload, "2024-05-01T10:00:00Z");
        let c = classifier();

        let (a, b) = tokio::join!(ingest(&pool, &c, &bytes), ingest(&pool, &c, &bytes));
        a.unwrap();
        b.unwrap();

        assert_eq!(count(&pool, "devices").await, 1);
        assert_eq!(count(&pool, "soil_readings").await, 2);
    }

    #[tokio::test]
    async fn test_older_uplink_does_not_rewind_snapshot() {
        let pool = test_pool().await;
        let c = classifier();
        let newer = json!({"moisture": 40.0, "temperature": 16.0, "ec": 110});
        let older = json!({"moisture": 10.0, "temperature": 11.0, "ec": 90});
        ingest(&pool, &c, &body(SOIL_EUI, newer, "2024-05-01T10:00:00Z")).await.unwrap();
        ingest(&pool, &c, &body(SOIL_EUI, older, "2024-05-01T08:00:00Z")).await.unwrap();

        let d = device(&pool, SOIL_EUI).await;
        assert_eq!(d.latest_moisture, Some(40.0));
        assert_eq!(d.latest_reading_at.as_deref(), Some("2024-05-01T10:00:00.000Z"));
        assert_eq!(count(&pool, "soil_readings").await, 2);
    }

    #[tokio::test]
    async fn test_invalid_body_touches_nothing() {
        let pool = test_pool().await;
        let err = ingest(&pool, &classifier(), br#"{"data": {"uplink_message": {}}}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
        assert_eq!(count(&pool, "devices").await, 0);
    }

    #[test]
    fn test_build_reading_lists_every_missing_field() {
        let fields = json!({"temperature": 20}).as_object().unwrap().clone();
        match build_reading(DeviceType::Co2Sensor, CO2_EUI, &fields) {
            Err(Error::IncompleteSensorData { missing, .. }) => {
                assert_eq!(missing, vec!["co2", "humidity", "pressure"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
