//! Database-backed sessions with a sliding expiry window.
//!
//! Only the SHA-256 of a token is ever stored or queried. Expired sessions
//! are removed lazily when they are presented.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::hash_token;
use crate::config::AuthConfig;
use crate::db::{self, DbPool, Session, User};
use crate::error::Result;

/// A session that passed validation together with its owner
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub session: Session,
    pub user: User,
    /// Expiry was pushed forward by this validation; the client cookie needs reissuing
    pub renewed: bool,
}

#[derive(Debug, Clone)]
pub struct SessionManager {
    db: DbPool,
    ttl: Duration,
    renew_threshold: Duration,
}

impl SessionManager {
    pub fn new(db: DbPool, config: &AuthConfig) -> Self {
        Self {
            db,
            ttl: Duration::days(config.session_ttl_days),
            renew_threshold: Duration::days(config.session_renew_threshold_days),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Opaque random token for a new session
    pub fn create_token(&self) -> String {
        super::create_token()
    }

    pub async fn create_session(&self, token: &str, user_id: &str) -> Result<Session> {
        self.create_session_at(token, user_id, Utc::now()).await
    }

    pub async fn create_session_at(
        &self,
        token: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_hash: hash_token(token),
            expires_at: db::timestamp(now + self.ttl),
            created_at: db::timestamp(now),
        };

        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.token_hash)
        .bind(&session.expires_at)
        .bind(&session.created_at)
        .execute(&self.db)
        .await?;

        Ok(session)
    }

    /// Resolve a presented token. `None` means the caller is not authenticated.
    pub async fn validate(&self, token: &str) -> Result<Option<AuthenticatedSession>> {
        self.validate_at(token, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthenticatedSession>> {
        let token_hash = hash_token(token);

        let session: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ?")
            .bind(&token_hash)
            .fetch_optional(&self.db)
            .await?;
        let Some(mut session) = session else {
            return Ok(None);
        };

        let expires_at = db::parse_timestamp(&session.expires_at);
        let expires_at = match expires_at {
            Some(at) if now < at => at,
            _ => {
                debug!(session_id = %session.id, "Session expired, removing");
                self.delete_by_hash(&token_hash).await?;
                return Ok(None);
            }
        };

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&session.user_id)
            .fetch_optional(&self.db)
            .await?;
        let Some(user) = user else {
            self.delete_by_hash(&token_hash).await?;
            return Ok(None);
        };

        let mut renewed = false;
        if expires_at - now < self.renew_threshold {
            let renewed_at = db::timestamp(now + self.ttl);
            let result = sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
                .bind(&renewed_at)
                .bind(&session.id)
                .execute(&self.db)
                .await;
            match result {
                Ok(_) => {
                    session.expires_at = renewed_at;
                    renewed = true;
                }
                Err(e) => warn!(session_id = %session.id, "Failed to extend session: {}", e),
            }
        }

        Ok(Some(AuthenticatedSession { session, user, renewed }))
    }

    /// Revoke a session. Unknown tokens are not an error.
    pub async fn invalidate(&self, token: &str) -> Result<()> {
        self.delete_by_hash(&hash_token(token)).await
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
