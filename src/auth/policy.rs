//! Role and tenant checks applied at every data-access boundary.
//!
//! Reads are filtered through a [`Scope`]; mutations first pass
//! [`require_write`] and then [`ensure_owned`] against the target entity.
//! Entities outside the caller's tenant are reported as `NotFound`, never as
//! `Forbidden`, so their existence does not leak.

use crate::db::{Role, User};
use crate::error::{Error, Result};

/// Row filter derived from the acting user.
///
/// `None` on a field means "no constraint". Queries bind both fields with the
/// `(? IS NULL OR col = ?)` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub organization_id: Option<String>,
    pub project_id: Option<String>,
}

impl Scope {
    /// Dashboard-style reads: the user's organization, narrowed to the active
    /// project when one is selected. SUPER_ADMIN drops the organization filter
    /// but still honors the active project.
    pub fn dashboard(user: &User) -> Self {
        Self {
            organization_id: org_filter(user),
            project_id: user.active_project_id.clone(),
        }
    }

    /// Tenant-wide reads with no project narrowing
    pub fn organization(user: &User) -> Self {
        Self {
            organization_id: org_filter(user),
            project_id: None,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.organization_id.is_none() && self.project_id.is_none()
    }

    pub fn permits(&self, organization_id: &str, project_id: Option<&str>) -> bool {
        let org_ok = self
            .organization_id
            .as_deref()
            .map_or(true, |org| org == organization_id);
        let project_ok = match (self.project_id.as_deref(), project_id) {
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
            (None, _) => true,
        };
        org_ok && project_ok
    }
}

fn org_filter(user: &User) -> Option<String> {
    if user.role_enum().is_super_admin() {
        None
    } else {
        Some(user.organization_id.clone())
    }
}

/// Deny create/update/delete to read-only roles
pub fn require_write(user: &User) -> Result<()> {
    require_role(user, Role::Admin)
        .map_err(|_| Error::forbidden("Viewers cannot modify projects, zones or devices"))
}

pub fn require_role(user: &User, required: Role) -> Result<()> {
    if user.role_enum().at_least(required) {
        Ok(())
    } else {
        Err(Error::forbidden(format!("{} role required", required)))
    }
}

/// Check that an entity belongs to the caller's organization.
/// SUPER_ADMIN may act on any organization.
pub fn ensure_owned(user: &User, organization_id: &str, kind: &'static str) -> Result<()> {
    if user.role_enum().is_super_admin() || user.organization_id == organization_id {
        Ok(())
    } else {
        Err(Error::NotFound(kind))
    }
}

#[cfg(test)]
pub(crate) fn test_user(role: Role, organization_id: &str, active_project_id: Option<&str>) -> User {
    User {
        id: format!("{}-{}", role.as_str().to_lowercase(), organization_id),
        organization_id: organization_id.to_string(),
        email: format!("{}@{}.test", role.as_str().to_lowercase(), organization_id),
        password_hash: String::new(),
        first_name: None,
        last_name: None,
        role: role.as_str().to_string(),
        active_project_id: active_project_id.map(str::to_string),
        created_at: String::new(),
        updated_at: String::new(),
    }
}
