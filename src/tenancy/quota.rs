//! Subscription-tier limits on projects, zones and devices.

use tracing::info;

use crate::config::QuotaConfig;
use crate::db::{DbPool, Organization};
use crate::error::{Error, ResourceKind, Result};

/// Count what an organization currently owns of one resource kind.
/// Devices count against the organization of the zone they are assigned to.
pub async fn count_resources(db: &DbPool, organization_id: &str, kind: ResourceKind) -> Result<i64> {
    let sql = match kind {
        ResourceKind::Project => "SELECT COUNT(*) FROM projects WHERE organization_id = ?",
        ResourceKind::Zone => "SELECT COUNT(*) FROM zones WHERE organization_id = ?",
        ResourceKind::Device => {
            "SELECT COUNT(*) FROM devices d JOIN zones z ON z.id = d.zone_id WHERE z.organization_id = ?"
        }
    };
    let count: i64 = sqlx::query_scalar(sql)
        .bind(organization_id)
        .fetch_one(db)
        .await?;
    Ok(count)
}

#[derive(Debug, Clone)]
pub struct QuotaEnforcer {
    quotas: QuotaConfig,
}

impl QuotaEnforcer {
    pub fn new(quotas: QuotaConfig) -> Self {
        Self { quotas }
    }

    pub fn limit_for(&self, organization: &Organization, kind: ResourceKind) -> Option<i64> {
        let limits = self.quotas.limits(organization.tier());
        match kind {
            ResourceKind::Project => limits.max_projects,
            ResourceKind::Zone => limits.max_zones,
            ResourceKind::Device => limits.max_devices,
        }
    }

    /// Allow creating one more `kind` for the organization, or fail with
    /// `QuotaExceeded` when its tier's limit is already reached.
    pub async fn check(&self, db: &DbPool, organization_id: &str, kind: ResourceKind) -> Result<()> {
        self.check_additional(db, organization_id, kind, 1).await
    }

    /// Like [`check`](Self::check) for adding `additional` resources at once
    pub async fn check_additional(
        &self,
        db: &DbPool,
        organization_id: &str,
        kind: ResourceKind,
        additional: i64,
    ) -> Result<()> {
        let organization: Organization = sqlx::query_as("SELECT * FROM organizations WHERE id = ?")
            .bind(organization_id)
            .fetch_optional(db)
            .await?
            .ok_or(Error::NotFound("Organization"))?;

        let Some(limit) = self.limit_for(&organization, kind) else {
            return Ok(());
        };

        let current = count_resources(db, organization_id, kind).await?;
        if current + additional > limit {
            info!(
                organization_id = %organization_id,
                tier = %organization.subscription_tier,
                kind = %kind,
                current,
                limit,
                "Quota reached"
            );
            return Err(Error::QuotaExceeded { kind, limit });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::services::fixtures;

    #[tokio::test]
    async fn test_free_tier_denies_third_project_until_upgrade() {
        let pool = test_pool().await;
        fixtures::organization(&pool, "org-1", "FREE").await;
        fixtures::project(&pool, "p-1", "org-1").await;
        fixtures::project(&pool, "p-2", "org-1").await;

        let quotas = QuotaEnforcer::new(QuotaConfig::default());
        let err = quotas.check(&pool, "org-1", ResourceKind::Project).await.unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                kind: ResourceKind::Project,
                limit: 2
            }
        ));

        sqlx::query("UPDATE organizations SET subscription_tier = 'BASIC' WHERE id = 'org-1'")
            .execute(&pool)
            .await
            .unwrap();
        quotas.check(&pool, "org-1", ResourceKind::Project).await.unwrap();
    }

    #[tokio::test]
    async fn test_enterprise_is_unbounded() {
        let pool = test_pool().await;
        fixtures::organization(&pool, "org-1", "ENTERPRISE").await;
        for i in 0..12 {
            fixtures::project(&pool, &format!("p-{}", i), "org-1").await;
        }
        let quotas = QuotaEnforcer::new(QuotaConfig::default());
        quotas.check(&pool, "org-1", ResourceKind::Project).await.unwrap();
    }

    #[tokio::test]
    async fn test_counts_are_per_organization() {
        let pool = test_pool().await;
        fixtures::organization(&pool, "org-1", "FREE").await;
        fixtures::organization(&pool, "org-2", "FREE").await;
        fixtures::project(&pool, "p-1", "org-1").await;
        fixtures::project(&pool, "p-2", "org-2").await;
        fixtures::zone(&pool, "z-1", "org-1", "p-1").await;
        fixtures::device(&pool, "24E124126C000001", Some("z-1")).await;
        fixtures::device(&pool, "24E124126C000002", None).await;

        assert_eq!(count_resources(&pool, "org-1", ResourceKind::Project).await.unwrap(), 1);
        assert_eq!(count_resources(&pool, "org-1", ResourceKind::Zone).await.unwrap(), 1);
        assert_eq!(count_resources(&pool, "org-1", ResourceKind::Device).await.unwrap(), 1);
        assert_eq!(count_resources(&pool, "org-2", ResourceKind::Device).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_check_additional_counts_the_batch() {
        let pool = test_pool().await;
        fixtures::organization(&pool, "org-1", "FREE").await;
        let quotas = QuotaEnforcer::new(QuotaConfig::default());
        quotas.check_additional(&pool, "org-1", ResourceKind::Device, 10).await.unwrap();
        assert!(matches!(
            quotas.check_additional(&pool, "org-1", ResourceKind::Device, 11).await,
            Err(Error::QuotaExceeded { limit: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_organization() {
        let pool = test_pool().await;
        let quotas = QuotaEnforcer::new(QuotaConfig::default());
        assert!(matches!(
            quotas.check(&pool, "missing", ResourceKind::Zone).await,
            Err(Error::NotFound("Organization"))
        ));
    }
}
