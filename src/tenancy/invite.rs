//! Single-use organization invite codes.

use chrono::{DateTime, Duration, Utc};
use rand::{distr::Alphanumeric, Rng};
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbPool, InviteCode, Role, User};
use crate::error::{Error, Result};

const CODE_LEN: usize = 32;

/// Optional details about the invitee, pre-filled on the signup form
#[derive(Debug, Clone, Default)]
pub struct Invitee {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Account details supplied by the person redeeming an invite
#[derive(Debug, Clone)]
pub struct NewMember {
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

fn generate_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone)]
pub struct InviteFlow {
    db: DbPool,
    expiry: Duration,
}

impl InviteFlow {
    pub fn new(db: DbPool, expiry_days: i64) -> Self {
        Self {
            db,
            expiry: Duration::days(expiry_days),
        }
    }

    pub async fn generate(
        &self,
        organization_id: &str,
        created_by: Option<&str>,
        invitee: Invitee,
    ) -> Result<InviteCode> {
        let now = Utc::now();
        let invite = InviteCode {
            id: Uuid::new_v4().to_string(),
            code: generate_code(),
            organization_id: organization_id.to_string(),
            first_name: invitee.first_name,
            last_name: invitee.last_name,
            email: invitee.email,
            expires_at: db::timestamp(now + self.expiry),
            is_used: false,
            used_at: None,
            created_by: created_by.map(str::to_string),
            created_at: db::timestamp(now),
        };

        sqlx::query(
            r#"
            INSERT INTO invite_codes (id, code, organization_id, first_name, last_name, email, expires_at, is_used, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&invite.id)
        .bind(&invite.code)
        .bind(&invite.organization_id)
        .bind(&invite.first_name)
        .bind(&invite.last_name)
        .bind(&invite.email)
        .bind(&invite.expires_at)
        .bind(&invite.created_by)
        .bind(&invite.created_at)
        .execute(&self.db)
        .await?;

        info!(organization_id = %organization_id, "Invite code generated");
        Ok(invite)
    }

    /// Look up a code that can still be redeemed
    pub async fn validate(&self, code: &str) -> Result<InviteCode> {
        self.validate_at(code, Utc::now()).await
    }

    pub async fn validate_at(&self, code: &str, now: DateTime<Utc>) -> Result<InviteCode> {
        let invite: Option<InviteCode> = sqlx::query_as("SELECT * FROM invite_codes WHERE code = ?")
            .bind(code.trim())
            .fetch_optional(&self.db)
            .await?;
        match invite {
            Some(invite) if invite.is_usable_at(now) => Ok(invite),
            _ => Err(Error::InvalidInvite),
        }
    }

    /// Redeem a code: mark it used and create the member in one transaction.
    ///
    /// The code is claimed with a conditional update on `is_used = 0`, so of
    /// any number of concurrent redemptions exactly one succeeds. If creating
    /// the user fails the claim is rolled back with it.
    pub async fn consume(&self, code: &str, member: NewMember) -> Result<User> {
        let now = Utc::now();
        let now_ts = db::timestamp(now);
        let code = code.trim();

        let mut tx = self.db.begin().await?;

        let claimed = sqlx::query(
            "UPDATE invite_codes SET is_used = 1, used_at = ? WHERE code = ? AND is_used = 0 AND expires_at > ?",
        )
        .bind(&now_ts)
        .bind(code)
        .bind(&now_ts)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() != 1 {
            return Err(Error::InvalidInvite);
        }

        let invite: InviteCode = sqlx::query_as("SELECT * FROM invite_codes WHERE code = ?")
            .bind(code)
            .fetch_one(&mut *tx)
            .await?;

        let first_project: Option<String> = sqlx::query_scalar(
            "SELECT id FROM projects WHERE organization_id = ? ORDER BY created_at ASC LIMIT 1",
        )
        .bind(&invite.organization_id)
        .fetch_optional(&mut *tx)
        .await?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            organization_id: invite.organization_id.clone(),
            email: member.email.trim().to_lowercase(),
            password_hash: member.password_hash,
            first_name: member.first_name.or(invite.first_name),
            last_name: member.last_name.or(invite.last_name),
            role: Role::Viewer.as_str().to_string(),
            active_project_id: first_project,
            created_at: now_ts.clone(),
            updated_at: now_ts,
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, organization_id, email, password_hash, first_name, last_name, role, active_project_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.organization_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.role)
        .bind(&user.active_project_id)
        .bind(&user.created_at)
        .bind(&user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => Error::Conflict("An account with this email already exists".to_string()),
            other => other,
        })?;

        tx.commit().await?;

        info!(organization_id = %user.organization_id, user_id = %user.id, "Invite redeemed");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::services::fixtures;

    fn member(email: &str) -> NewMember {
        NewMember {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: None,
            last_name: None,
        }
    }

    async fn flow() -> InviteFlow {
        let pool = test_pool().await;
        fixtures::organization(&pool, "org-1", "FREE").await;
        fixtures::project(&pool, "p-1", "org-1").await;
        InviteFlow::new(pool, 7)
    }

    #[tokio::test]
    async fn test_generate_and_consume() {
        let flow = flow().await;
        let invitee = Invitee {
            email: Some("kofi@example.com".to_string()),
            first_name: Some("Kofi".to_string()),
            last_name: None,
        };
        let invite = flow.generate("org-1", None, invitee).await.unwrap();
        assert_eq!(invite.code.len(), 32);
        assert!(invite.code.chars().all(|c| c.is_ascii_alphanumeric()));
        flow.validate(&invite.code).await.unwrap();

        let user = flow.consume(&invite.code, member("Kofi@Example.com")).await.unwrap();
        assert_eq!(user.organization_id, "org-1");
        assert_eq!(user.role_enum(), Role::Viewer);
        assert_eq!(user.email, "kofi@example.com");
        assert_eq!(user.first_name.as_deref(), Some("Kofi"));
        assert_eq!(user.active_project_id.as_deref(), Some("p-1"));

        assert!(matches!(flow.validate(&invite.code).await, Err(Error::InvalidInvite)));
    }

    #[tokio::test]
    async fn test_second_redemption_is_rejected() {
        let flow = flow().await;
        let invite = flow.generate("org-1", None, Invitee::default()).await.unwrap();

        let (a, b) = tokio::join!(
            flow.consume(&invite.code, member("a@example.com")),
            flow.consume(&invite.code, member("b@example.com"))
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(Error::InvalidInvite)))
                .count(),
            1
        );

        let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE organization_id = 'org-1'")
            .fetch_one(&flow.db)
            .await
            .unwrap();
        assert_eq!(members, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_redemptions_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.server.data_dir = dir.path().to_path_buf();
        config.server.max_db_connections = 8;
        let pool = db::init(&config).await.unwrap();
        fixtures::organization(&pool, "org-1", "FREE").await;
        fixtures::project(&pool, "p-1", "org-1").await;

        let flow = InviteFlow::new(pool, 7);
        let invite = flow.generate("org-1", None, Invitee::default()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let flow = flow.clone();
                let code = invite.code.clone();
                tokio::spawn(async move { flow.consume(&code, member(&format!("racer{}@example.com", i))).await })
            })
            .collect();

        let mut redeemed = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => redeemed += 1,
                Err(Error::InvalidInvite) => rejected += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!((redeemed, rejected), (1, 7));

        let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE organization_id = 'org-1'")
            .fetch_one(&flow.db)
            .await
            .unwrap();
        assert_eq!(members, 1);
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let flow = flow().await;
        let invite = flow.generate("org-1", None, Invitee::default()).await.unwrap();
        let later = Utc::now() + Duration::days(8);
        assert!(matches!(flow.validate_at(&invite.code, later).await, Err(Error::InvalidInvite)));

        sqlx::query("UPDATE invite_codes SET expires_at = ? WHERE code = ?")
            .bind(db::timestamp(Utc::now() - Duration::minutes(1)))
            .bind(&invite.code)
            .execute(&flow.db)
            .await
            .unwrap();
        assert!(matches!(
            flow.consume(&invite.code, member("late@example.com")).await,
            Err(Error::InvalidInvite)
        ));
    }

    #[tokio::test]
    async fn test_failed_user_creation_releases_code() {
        let flow = flow().await;
        fixtures::user(&flow.db, "u-1", "org-1", Role::Admin, None).await;
        let taken = "admin-u-1@example.com";
        let invite = flow.generate("org-1", None, Invitee::default()).await.unwrap();

        let err = flow.consume(&invite.code, member(taken)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        flow.validate(&invite.code).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let flow = flow().await;
        assert!(matches!(flow.validate("nope").await, Err(Error::InvalidInvite)));
        assert!(matches!(
            flow.consume("nope", member("x@example.com")).await,
            Err(Error::InvalidInvite)
        ));
    }
}
