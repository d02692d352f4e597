//! Permission store: flattens a user's role assignments into an effective
//! permission set for one tenant.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::models::{set_grants, PermissionKey, RoleId, TenantId, UserId};
use crate::directory::DirectoryStore;
use crate::error::Result;

/// A role the user holds, reduced to what callers display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub id: RoleId,
    pub name: String,
    pub role_level: u8,
}

/// The flattened permission set of one user in one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPermissions {
    pub permissions: BTreeSet<PermissionKey>,
    /// Highest level among the assigned roles, 0 with no roles.
    pub role_level: u8,
    /// Ordered by level (highest first), then id.
    pub roles: Vec<RoleSummary>,
}

impl ResolvedPermissions {
    pub fn has_roles(&self) -> bool {
        !self.roles.is_empty()
    }

    /// The highest-level role.
    pub fn primary_role(&self) -> Option<&RoleSummary> {
        self.roles.first()
    }

    pub fn grants(&self, permission: &PermissionKey) -> bool {
        set_grants(&self.permissions, permission)
    }
}

/// Resolves effective permissions from the directory.
///
/// Permissions are reachable only through roles. Expired assignments and roles
/// owned by a different tenant are ignored.
#[derive(Clone)]
pub struct PermissionStore {
    directory: Arc<dyn DirectoryStore>,
}

impl PermissionStore {
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self { directory }
    }

    /// Union of the permissions of every role currently assigned to the user in
    /// the tenant. Unknown users or tenants resolve to an empty set; blank ids
    /// are rejected.
    #[instrument(skip(self), fields(user_id = %user_id, tenant_id = %tenant_id))]
    pub async fn resolve_permissions(&self, user_id: &UserId, tenant_id: &TenantId) -> Result<ResolvedPermissions> {
        user_id.ensure_present()?;
        tenant_id.ensure_present()?;

        let now = Utc::now();
        let role_ids: Vec<RoleId> = self
            .directory
            .role_assignments(tenant_id, user_id)
            .await?
            .into_iter()
            .filter(|a| &a.tenant_id == tenant_id && &a.user_id == user_id && a.is_active_at(now))
            .map(|a| a.role_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if role_ids.is_empty() {
            debug!("No active role assignments");
            return Ok(ResolvedPermissions::default());
        }

        let mut resolved = ResolvedPermissions::default();
        for role in self.directory.roles(&role_ids).await? {
            if !role.is_visible_to(tenant_id) {
                debug!(role_id = %role.id, "Ignoring role owned by another tenant");
                continue;
            }
            resolved.role_level = resolved.role_level.max(role.role_level);
            resolved.permissions.extend(role.permissions.iter().cloned());
            resolved.roles.push(RoleSummary {
                id: role.id,
                name: role.name,
                role_level: role.role_level,
            });
        }

        resolved
            .roles
            .sort_by(|a, b| b.role_level.cmp(&a.role_level).then_with(|| a.id.cmp(&b.id)));

        debug!(
            roles = resolved.roles.len(),
            permissions = resolved.permissions.len(),
            role_level = resolved.role_level,
            "Resolved permissions"
        );
        Ok(resolved)
    }

    /// Highest role level of the user in the tenant, 0 with no roles.
    pub async fn role_level(&self, user_id: &UserId, tenant_id: &TenantId) -> Result<u8> {
        Ok(self.resolve_permissions(user_id, tenant_id).await?.role_level)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
