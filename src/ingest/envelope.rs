//! Webhook envelope shapes accepted from the network server.
//!
//! Two shapes are in circulation: the network server's uplink body posted
//! directly, and the same body wrapped in a `{ "data": .., "time": .. }`
//! envelope by the integration forwarder. Each is normalized into one
//! [`UplinkRecord`] by its own adapter; the pipeline only ever sees the record.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::classifier::normalize_eui;
use super::decoder::{decode, DecodedFields};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndDeviceIds {
    pub dev_eui: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RxMetadata {
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UplinkMessage {
    /// Payload already decoded by the network server
    pub decoded_payload: Option<Value>,
    /// Raw payload, base64
    pub frm_payload: Option<String>,
    /// Raw payload, hex
    pub payload_hex: Option<String>,
    /// Network servers send `null` here when no gateway metadata is known
    #[serde(default)]
    pub rx_metadata: Option<Vec<RxMetadata>>,
    pub received_at: Option<String>,
}

/// Uplink body as produced by the network server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UplinkBody {
    pub end_device_ids: Option<EndDeviceIds>,
    pub uplink_message: Option<UplinkMessage>,
    pub received_at: Option<String>,
}

/// Known envelope shapes. `Wrapped` is tried first; anything else that is a
/// JSON object is read as a direct uplink body.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WebhookEnvelope {
    Wrapped {
        data: UplinkBody,
        time: Option<String>,
    },
    Direct(UplinkBody),
}

/// Canonical ingestion record
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkRecord {
    pub eui: String,
    pub received_at: DateTime<Utc>,
    pub fields: DecodedFields,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    pub battery: Option<f64>,
}

impl WebhookEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::InvalidPayload(format!("malformed JSON body: {}", e)))
    }

    /// Normalize into an [`UplinkRecord`]. `now` is used when neither the
    /// payload nor the envelope carries a usable timestamp.
    pub fn into_record(self, now: DateTime<Utc>) -> Result<UplinkRecord> {
        match self {
            WebhookEnvelope::Wrapped { data, time } => from_wrapped(data, time, now),
            WebhookEnvelope::Direct(body) => from_direct(body, now),
        }
    }
}

fn from_wrapped(data: UplinkBody, time: Option<String>, now: DateTime<Utc>) -> Result<UplinkRecord> {
    normalize(data, time.as_deref(), now)
}

fn from_direct(body: UplinkBody, now: DateTime<Utc>) -> Result<UplinkRecord> {
    normalize(body, None, now)
}

fn normalize(body: UplinkBody, request_time: Option<&str>, now: DateTime<Utc>) -> Result<UplinkRecord> {
    let ids = body
        .end_device_ids
        .ok_or_else(|| Error::InvalidPayload("missing end_device_ids".to_string()))?;
    let uplink = body
        .uplink_message
        .ok_or_else(|| Error::InvalidPayload("missing uplink_message".to_string()))?;

    let fields = extract_fields(&uplink)?;
    let eui = extract_eui(&ids).ok_or(Error::MissingDeviceId)?;

    let received_at = payload_timestamp(&fields)
        .or_else(|| body.received_at.as_deref().and_then(parse_time))
        .or_else(|| uplink.received_at.as_deref().and_then(parse_time))
        .or_else(|| request_time.and_then(parse_time))
        .unwrap_or(now);

    let (rssi, snr) = strongest_signal(uplink.rx_metadata.as_deref().unwrap_or_default());
    let battery = fields.get("battery").and_then(Value::as_f64);

    Ok(UplinkRecord {
        eui,
        received_at,
        fields,
        rssi,
        snr,
        battery,
    })
}

fn extract_eui(ids: &EndDeviceIds) -> Option<String> {
    let from_dev_eui = ids.dev_eui.as_deref().map(normalize_eui);
    let from_device_id = ids.device_id.as_deref().map(|id| {
        let id = id.trim();
        let id = match id.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("eui-") => &id[4..],
            _ => id,
        };
        normalize_eui(id)
    });
    from_dev_eui
        .filter(|eui| !eui.is_empty())
        .or(from_device_id)
        .filter(|eui| !eui.is_empty())
}

fn extract_fields(uplink: &UplinkMessage) -> Result<DecodedFields> {
    if let Some(decoded) = &uplink.decoded_payload {
        return match decoded {
            Value::Object(map) => Ok(map.clone()),
            _ => Err(Error::InvalidPayload(
                "decoded_payload must be an object".to_string(),
            )),
        };
    }
    if let Some(raw) = &uplink.frm_payload {
        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|_| Error::InvalidPayload("frm_payload is not valid base64".to_string()))?;
        return Ok(decode(&bytes));
    }
    if let Some(raw) = &uplink.payload_hex {
        let bytes = hex::decode(raw.trim())
            .map_err(|_| Error::InvalidPayload("payload_hex is not valid hex".to_string()))?;
        return Ok(decode(&bytes));
    }
    Err(Error::InvalidPayload("uplink_message carries no payload".to_string()))
}

/// Timestamp reported by the device itself, as unix seconds (or millis) or RFC 3339
fn payload_timestamp(fields: &DecodedFields) -> Option<DateTime<Utc>> {
    match fields.get("timestamp")? {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if !raw.is_finite() || raw <= 0.0 {
                return None;
            }
            let millis = if raw >= 1e12 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        Value::String(s) => parse_time(s),
        _ => None,
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// rssi/snr of the gateway that heard the uplink best
fn strongest_signal(metadata: &[RxMetadata]) -> (Option<f64>, Option<f64>) {
    metadata
        .iter()
        .filter(|m| m.rssi.is_some() || m.snr.is_some())
        .max_by(|a, b| {
            let a = a.rssi.unwrap_or(f64::NEG_INFINITY);
            let b = b.rssi.unwrap_or(f64::NEG_INFINITY);
            a.total_cmp(&b)
        })
        .map(|m| (m.rssi, m.snr))
        .unwrap_or((None, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(body: Value) -> Result<UplinkRecord> {
        let bytes = serde_json::to_vec(&body).unwrap();
        WebhookEnvelope::parse(&bytes)?.into_record(Utc::now())
    }

    #[test]
    fn test_wrapped_envelope() {
        let rec = record(json!({
            "data": {
                "end_device_ids": {"dev_eui": "24e124126c486336"},
                "received_at": "2024-05-01T10:00:00Z",
                "uplink_message": {
                    "decoded_payload": {"moisture": 31.5, "temperature": 18.2, "ec": 120, "battery": 97},
                    "rx_metadata": [{"rssi": -110, "snr": 2.5}, {"rssi": -87, "snr": 9.0}]
                }
            },
            "time": "2024-05-01T11:00:00Z"
        }))
        .unwrap();
        assert_eq!(rec.eui, "24E124126C486336");
        assert_eq!(rec.received_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(rec.rssi, Some(-87.0));
        assert_eq!(rec.snr, Some(9.0));
        assert_eq!(rec.battery, Some(97.0));
        assert_eq!(rec.fields["ec"], json!(120));
    }

    #[test]
    fn test_direct_envelope_with_device_id() {
        let rec = record(json!({
            "end_device_ids": {"device_id": "eui-24e124126e031234"},
            "uplink_message": {
                "decoded_payload": {"co2": 600},
                "received_at": "2024-05-02T08:30:00Z"
            }
        }))
        .unwrap();
        assert_eq!(rec.eui, "24E124126E031234");
        assert_eq!(rec.received_at.to_rfc3339(), "2024-05-02T08:30:00+00:00");
        assert_eq!(rec.rssi, None);
    }

    #[test]
    fn test_null_rx_metadata() {
        let rec = record(json!({
            "end_device_ids": {"dev_eui": "24E124126C486336"},
            "uplink_message": {
                "decoded_payload": {"moisture": 28.0, "temperature": 12.5, "ec": 90},
                "rx_metadata": null
            }
        }))
        .unwrap();
        assert_eq!(rec.eui, "24E124126C486336");
        assert_eq!(rec.rssi, None);
        assert_eq!(rec.snr, None);
    }

    #[test]
    fn test_timestamp_fallbacks() {
        let payload_ts = record(json!({
            "data": {
                "end_device_ids": {"dev_eui": "AA"},
                "received_at": "2024-05-01T10:00:00Z",
                "uplink_message": {"decoded_payload": {"timestamp": 1_700_000_000}}
            }
        }))
        .unwrap();
        assert_eq!(payload_ts.received_at.timestamp(), 1_700_000_000);

        let request_ts = record(json!({
            "data": {
                "end_device_ids": {"dev_eui": "AA"},
                "uplink_message": {"decoded_payload": {}}
            },
            "time": "2024-06-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(request_ts.received_at.to_rfc3339(), "2024-06-01T00:00:00+00:00");

        let before = Utc::now();
        let clock = record(json!({
            "end_device_ids": {"dev_eui": "AA"},
            "uplink_message": {"decoded_payload": {"timestamp": "garbage"}}
        }))
        .unwrap();
        assert!(clock.received_at >= before);
    }

    #[test]
    fn test_missing_blocks_are_invalid_payload() {
        assert!(matches!(
            record(json!({"uplink_message": {"decoded_payload": {}}})),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            record(json!({"data": {"end_device_ids": {"dev_eui": "AA"}}})),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            record(json!({"end_device_ids": {}, "uplink_message": {}})),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            WebhookEnvelope::parse(b"not json"),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_missing_eui() {
        assert!(matches!(
            record(json!({
                "end_device_ids": {"dev_eui": "  "},
                "uplink_message": {"decoded_payload": {"co2": 400}}
            })),
            Err(Error::MissingDeviceId)
        ));
    }

    #[test]
    fn test_raw_payloads_go_through_decoder() {
        let hex_rec = record(json!({
            "end_device_ids": {"dev_eui": "24E124460C484055"},
            "uplink_message": {"payload_hex": "017564030101"}
        }))
        .unwrap();
        assert_eq!(hex_rec.battery, Some(100.0));
        assert_eq!(hex_rec.fields["valve_1"], json!("open"));

        let b64_rec = record(json!({
            "end_device_ids": {"dev_eui": "24E124460C484055"},
            "uplink_message": {"frm_payload": STANDARD.encode([0x01u8, 0x75, 0x32])}
        }))
        .unwrap();
        assert_eq!(b64_rec.battery, Some(50.0));

        assert!(matches!(
            record(json!({
                "end_device_ids": {"dev_eui": "AA"},
                "uplink_message": {"payload_hex": "zz"}
            })),
            Err(Error::InvalidPayload(_))
        ));
    }
}
