//! In-memory directory store.
//!
//! Thread-safe via `DashMap`. Used by tests, the CLI and single-node deployments
//! that load their directory from a fixture file.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::models::{SubscriptionTier, Tenant, TenantMember};
use super::DirectoryStore;
use crate::error::{Result, WaypointError};
use crate::rbac::{PredefinedRole, Role, RoleAssignment, RoleId, TenantId, TierId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Seed
// ═══════════════════════════════════════════════════════════════════════════════

fn default_true() -> bool {
    true
}

/// Serializable snapshot used to populate an [`InMemoryDirectory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    /// Also register the predefined system roles.
    #[serde(default = "default_true")]
    pub predefined_roles: bool,
    #[serde(default)]
    pub tiers: Vec<SubscriptionTier>,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub members: Vec<TenantMember>,
    #[serde(default)]
    pub assignments: Vec<RoleAssignment>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    tenants: Arc<DashMap<TenantId, Tenant>>,
    tiers: Arc<DashMap<TierId, SubscriptionTier>>,
    roles: Arc<DashMap<RoleId, Role>>,
    members: Arc<DashMap<(TenantId, UserId), TenantMember>>,
    assignments: Arc<DashMap<(TenantId, UserId), Vec<RoleAssignment>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds the predefined system roles.
    pub fn with_predefined_roles() -> Self {
        let directory = Self::new();
        directory.load_roles(PredefinedRole::all_defaults());
        directory
    }

    /// Build a store from a seed. Assignments that reference unknown roles are rejected.
    pub fn from_seed(seed: DirectorySeed) -> Result<Self> {
        let directory = if seed.predefined_roles {
            Self::with_predefined_roles()
        } else {
            Self::new()
        };

        for tier in seed.tiers {
            directory.upsert_tier(tier);
        }
        for tenant in seed.tenants {
            directory.upsert_tenant(tenant);
        }
        directory.load_roles(seed.roles);
        for member in seed.members {
            directory.add_member(member);
        }
        for assignment in seed.assignments {
            directory.assign_role(assignment)?;
        }

        Ok(directory)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tenants and tiers
    // ─────────────────────────────────────────────────────────────────────────

    pub fn upsert_tier(&self, tier: SubscriptionTier) {
        debug!(tier_id = %tier.id, "Upserting subscription tier");
        self.tiers.insert(tier.id.clone(), tier);
    }

    pub fn upsert_tenant(&self, tenant: Tenant) {
        debug!(tenant_id = %tenant.id, "Upserting tenant");
        self.tenants.insert(tenant.id.clone(), tenant);
    }

    pub fn get_tenant(&self, tenant_id: &TenantId) -> Option<Tenant> {
        self.tenants.get(tenant_id).map(|t| t.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_role(&self, role: Role) {
        debug!(role_id = %role.id, "Adding role");
        self.roles.insert(role.id.clone(), role);
    }

    pub fn load_roles(&self, roles: Vec<Role>) {
        for role in roles {
            self.add_role(role);
        }
    }

    pub fn get_role(&self, role_id: &RoleId) -> Option<Role> {
        self.roles.get(role_id).map(|r| r.clone())
    }

    /// Remove a role. Returns `false` if the role is a system role or not found.
    pub fn remove_role(&self, role_id: &RoleId) -> bool {
        if let Some(role) = self.roles.get(role_id) {
            if role.is_system {
                warn!(role_id = %role_id, "Cannot remove system role");
                return false;
            }
        }
        self.roles.remove(role_id).is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Members and assignments
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_member(&self, member: TenantMember) {
        let key = (member.tenant_id.clone(), member.user_id.clone());
        self.members.insert(key, member);
    }

    pub fn remove_member(&self, tenant_id: &TenantId, user_id: &UserId) -> bool {
        let key = (tenant_id.clone(), user_id.clone());
        self.assignments.remove(&key);
        self.members.remove(&key).is_some()
    }

    /// Assign a role. Returns `Ok(false)` when the assignment is already expired.
    ///
    /// The role must exist and be visible to the assignment's tenant.
    pub fn assign_role(&self, assignment: RoleAssignment) -> Result<bool> {
        let visible = self
            .roles
            .get(&assignment.role_id)
            .map(|role| role.is_visible_to(&assignment.tenant_id));
        match visible {
            None => {
                return Err(WaypointError::invalid_input(format!(
                    "unknown role: {}",
                    assignment.role_id
                )))
            }
            Some(false) => {
                return Err(WaypointError::invalid_input(format!(
                    "role {} belongs to another tenant",
                    assignment.role_id
                )))
            }
            Some(true) => {}
        }

        if !assignment.is_active_at(Utc::now()) {
            debug!(
                user_id = %assignment.user_id,
                role_id = %assignment.role_id,
                "Skipping expired assignment"
            );
            return Ok(false);
        }

        let key = (assignment.tenant_id.clone(), assignment.user_id.clone());
        let mut entry = self.assignments.entry(key).or_default();
        entry.retain(|a| a.role_id != assignment.role_id);
        entry.push(assignment);
        Ok(true)
    }

    pub fn revoke_role(&self, tenant_id: &TenantId, user_id: &UserId, role_id: &RoleId) -> bool {
        let key = (tenant_id.clone(), user_id.clone());
        match self.assignments.get_mut(&key) {
            Some(mut assignments) => {
                let before = assignments.len();
                assignments.retain(|a| &a.role_id != role_id);
                assignments.len() != before
            }
            None => false,
        }
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        Ok(self.get_tenant(tenant_id))
    }

    async fn subscription_tier(&self, tier_id: &TierId) -> Result<Option<SubscriptionTier>> {
        Ok(self.tiers.get(tier_id).map(|t| t.clone()))
    }

    async fn member(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<Option<TenantMember>> {
        let key = (tenant_id.clone(), user_id.clone());
        Ok(self.members.get(&key).map(|m| m.clone()))
    }

    async fn role_assignments(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<Vec<RoleAssignment>> {
        let key = (tenant_id.clone(), user_id.clone());
        Ok(self.assignments.get(&key).map(|a| a.clone()).unwrap_or_default())
    }

    async fn roles(&self, role_ids: &[RoleId]) -> Result<Vec<Role>> {
        Ok(role_ids.iter().filter_map(|id| self.get_role(id)).collect())
    }

    async fn tenants_on_tier(&self, tier_id: &TierId) -> Result<Vec<TenantId>> {
        Ok(self
            .tenants
            .iter()
            .filter(|t| &t.subscription_tier_id == tier_id)
            .map(|t| t.id.clone())
            .collect())
    }

    async fn reseller_children(&self, tenant_id: &TenantId) -> Result<Vec<TenantId>> {
        Ok(self
            .tenants
            .iter()
            .filter(|t| t.reseller_parent_id.as_ref() == Some(tenant_id))
            .map(|t| t.id.clone())
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
