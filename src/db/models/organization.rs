//! Organization (tenant) model and subscription tiers.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Subscription tiers, weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionTier {
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "FREE",
            SubscriptionTier::Basic => "BASIC",
            SubscriptionTier::Pro => "PRO",
            SubscriptionTier::Enterprise => "ENTERPRISE",
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FREE" => Ok(SubscriptionTier::Free),
            "BASIC" => Ok(SubscriptionTier::Basic),
            "PRO" => Ok(SubscriptionTier::Pro),
            "ENTERPRISE" => Ok(SubscriptionTier::Enterprise),
            _ => Err(format!("Unknown subscription tier: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub subscription_tier: String,
    /// Snapshot of the tier limits taken when the tier was last set
    pub max_projects: Option<i64>,
    pub max_zones: Option<i64>,
    pub max_devices: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Organization {
    pub fn tier(&self) -> SubscriptionTier {
        self.subscription_tier
            .parse()
            .unwrap_or(SubscriptionTier::Free)
    }
}

/// Current usage against the organization's limits
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationUsage {
    pub projects: i64,
    pub zones: i64,
    pub devices: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationSummary {
    pub id: String,
    pub name: String,
    pub subscription_tier: String,
    pub max_projects: Option<i64>,
    pub max_zones: Option<i64>,
    pub max_devices: Option<i64>,
    pub usage: OrganizationUsage,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub organization_id: String,
    pub tier: String,
}
