//! Tenant directory: the data-store boundary the engine reads from.
//!
//! The engine never writes to the directory. Admin mutations go through the
//! concrete stores and are followed by an [`crate::cache::ChangeEvent`] so cached
//! entitlements and permissions are dropped.
//!
//! - [`InMemoryDirectory`]: DashMap-backed store, seeded from a [`DirectorySeed`]
//! - [`PgDirectory`]: PostgreSQL via sqlx

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::rbac::{Role, RoleAssignment, RoleId, TenantId, TierId, UserId};

pub use memory::{DirectorySeed, InMemoryDirectory};
pub use models::{Locale, MemberStatus, SubscriptionTier, Tenant, TenantMember, TenantStatus};
pub use postgres::PgDirectory;

/// Read access to tenants, tiers, memberships, roles and role assignments.
///
/// Lookups of unknown records return `Ok(None)` / empty collections. `Err` is
/// reserved for store failures.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>>;

    async fn subscription_tier(&self, tier_id: &TierId) -> Result<Option<SubscriptionTier>>;

    async fn member(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<Option<TenantMember>>;

    /// All assignments for the user in the tenant, including expired ones.
    async fn role_assignments(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<Vec<RoleAssignment>>;

    /// Roles by id; unknown ids are skipped.
    async fn roles(&self, role_ids: &[RoleId]) -> Result<Vec<Role>>;

    async fn tenants_on_tier(&self, tier_id: &TierId) -> Result<Vec<TenantId>>;

    async fn reseller_children(&self, tenant_id: &TenantId) -> Result<Vec<TenantId>>;
}
