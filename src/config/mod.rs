use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::{DeviceType, SubscriptionTier};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub quotas: QuotaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Overrides the SQLite file under `data_dir`
    pub database_url: Option<String>,
    #[serde(default = "default_max_db_connections")]
    pub max_db_connections: u32,
    #[serde(default = "default_db_acquire_timeout")]
    pub db_acquire_timeout_secs: u64,
    /// Base URL used to build links in outgoing emails
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            database_url: None,
            max_db_connections: default_max_db_connections(),
            db_acquire_timeout_secs: default_db_acquire_timeout(),
            public_url: default_public_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_db_connections() -> u32 {
    5
}

fn default_db_acquire_timeout() -> u64 {
    10
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    /// Sessions with less than this many days left are extended on use
    #[serde(default = "default_session_renew_threshold_days")]
    pub session_renew_threshold_days: i64,
    /// Set the `Secure` attribute on the session cookie
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
    #[serde(default = "default_invite_expiry_days")]
    pub invite_expiry_days: i64,
    /// When both are set, a SUPER_ADMIN with these credentials is created on startup
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_days: default_session_ttl_days(),
            session_renew_threshold_days: default_session_renew_threshold_days(),
            secure_cookies: true,
            invite_expiry_days: default_invite_expiry_days(),
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
        }
    }
}

fn default_session_ttl_days() -> i64 {
    30
}

fn default_session_renew_threshold_days() -> i64 {
    15
}

fn default_invite_expiry_days() -> i64 {
    7
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: true,
            from_address: None,
            from_name: default_from_name(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Terrasense".to_string()
}

fn default_send_timeout() -> u64 {
    15
}

/// One entry of the EUI prefix table used to classify unseen devices.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrefixRule {
    pub prefix: String,
    pub device_type: DeviceType,
}

impl PrefixRule {
    pub fn new(prefix: &str, device_type: DeviceType) -> Self {
        Self {
            prefix: prefix.to_string(),
            device_type,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Shared secret expected from the network server, if set
    pub webhook_token: Option<String>,
    #[serde(default = "default_device_prefixes")]
    pub device_prefixes: Vec<PrefixRule>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            webhook_token: None,
            device_prefixes: default_device_prefixes(),
        }
    }
}

fn default_device_prefixes() -> Vec<PrefixRule> {
    vec![
        PrefixRule::new("24E124126E", DeviceType::Co2Sensor),
        PrefixRule::new("24E124126C", DeviceType::SoilMoisture),
        PrefixRule::new("24E124713", DeviceType::LiquidLevel),
    ]
}

/// Resource limits for one subscription tier. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierLimits {
    pub max_projects: Option<i64>,
    pub max_zones: Option<i64>,
    pub max_devices: Option<i64>,
}

impl TierLimits {
    pub const fn bounded(projects: i64, zones: i64, devices: i64) -> Self {
        Self {
            max_projects: Some(projects),
            max_zones: Some(zones),
            max_devices: Some(devices),
        }
    }

    pub const fn unbounded() -> Self {
        Self {
            max_projects: None,
            max_zones: None,
            max_devices: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_free_limits")]
    pub free: TierLimits,
    #[serde(default = "default_basic_limits")]
    pub basic: TierLimits,
    #[serde(default = "default_pro_limits")]
    pub pro: TierLimits,
    #[serde(default = "TierLimits::unbounded")]
    pub enterprise: TierLimits,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free: default_free_limits(),
            basic: default_basic_limits(),
            pro: default_pro_limits(),
            enterprise: TierLimits::unbounded(),
        }
    }
}

impl QuotaConfig {
    pub fn limits(&self, tier: SubscriptionTier) -> TierLimits {
        match tier {
            SubscriptionTier::Free => self.free,
            SubscriptionTier::Basic => self.basic,
            SubscriptionTier::Pro => self.pro,
            SubscriptionTier::Enterprise => self.enterprise,
        }
    }
}

fn default_free_limits() -> TierLimits {
    TierLimits::bounded(2, 5, 10)
}

fn default_basic_limits() -> TierLimits {
    TierLimits::bounded(5, 15, 30)
}

fn default_pro_limits() -> TierLimits {
    TierLimits::bounded(10, 50, 100)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn database_url(&self) -> String {
        match &self.server.database_url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite:{}?mode=rwc",
                self.server.data_dir.join("terrasense.db").display()
            ),
        }
    }
}
