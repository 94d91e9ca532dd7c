//! Organization invite codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InviteCode {
    pub id: String,
    pub code: String,
    pub organization_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub expires_at: String,
    pub is_used: bool,
    pub used_at: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
}

impl InviteCode {
    /// Check if the invite has expired as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match crate::db::parse_timestamp(&self.expires_at) {
            Some(expires) => expires <= now,
            None => true, // Treat parse errors as expired
        }
    }

    /// Usable means not yet consumed and not expired
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && !self.is_expired_at(now)
    }
}

/// Invite details safe to show to the invitee before signup
#[derive(Debug, Clone, Serialize)]
pub struct InvitePreview {
    pub organization_id: String,
    pub organization_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SendInviteRequest {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InviteCodeResponse {
    pub code: String,
    pub expires_at: String,
}
