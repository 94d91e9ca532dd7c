//! Uplink counters. Described and rendered by the `/metrics` endpoint.

use metrics::counter;

pub const TELEMETRY_UPLINKS_TOTAL: &str = "telemetry_uplinks_total";

/// Count one webhook uplink
pub fn record_uplink(outcome: &str, device_type: &str) {
    counter!(
        TELEMETRY_UPLINKS_TOTAL,
        "outcome" => outcome.to_string(),
        "device_type" => device_type.to_string()
    )
    .increment(1);
}
