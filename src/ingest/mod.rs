//! Telemetry ingestion from the LoRaWAN network server webhook.

pub mod classifier;
pub mod decoder;
pub mod envelope;
pub mod metrics;
pub mod pipeline;

pub use classifier::DeviceClassifier;
pub use envelope::{UplinkRecord, WebhookEnvelope};
pub use pipeline::{ingest, IngestOutcome};
