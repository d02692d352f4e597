//! PostgreSQL directory store.
//!
//! Reads the tables created by `migrations/`. Every query is filtered by tenant
//! where the table is tenant-scoped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use std::collections::BTreeMap;
use tracing::instrument;

use super::models::{Locale, MemberStatus, SubscriptionTier, Tenant, TenantMember, TenantStatus};
use super::DirectoryStore;
use crate::config::DatabaseConfig;
use crate::error::{Result, WaypointError};
use crate::rbac::{ModuleKey, PermissionKey, Role, RoleAssignment, RoleId, TenantId, TierId, UserId};

/// Directory backed by PostgreSQL.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    /// Connect using the database section of the configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| WaypointError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: String,
    slug: String,
    name: String,
    status: String,
    subscription_tier_id: String,
    enabled_modules: Option<Vec<String>>,
    is_white_label: bool,
    custom_domain: Option<String>,
    module_labels: Json<BTreeMap<String, String>>,
    is_reseller: bool,
    reseller_parent_id: Option<String>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: TenantId(row.id),
            slug: row.slug,
            name: row.name,
            status: TenantStatus::parse(&row.status),
            subscription_tier_id: TierId(row.subscription_tier_id),
            enabled_modules: row
                .enabled_modules
                .map(|modules| modules.into_iter().map(ModuleKey).collect()),
            is_white_label: row.is_white_label,
            custom_domain: row.custom_domain,
            module_labels: row
                .module_labels
                .0
                .into_iter()
                .map(|(module, label)| (ModuleKey(module), label))
                .collect(),
            is_reseller: row.is_reseller,
            reseller_parent_id: row.reseller_parent_id.map(TenantId),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TierRow {
    id: String,
    name: String,
    modules: Vec<String>,
    usage_limits: Json<BTreeMap<String, i64>>,
}

impl From<TierRow> for SubscriptionTier {
    fn from(row: TierRow) -> Self {
        Self {
            id: TierId(row.id),
            name: row.name,
            modules: row.modules.into_iter().map(ModuleKey).collect(),
            // Negative limits are treated as zero.
            usage_limits: row
                .usage_limits
                .0
                .into_iter()
                .map(|(name, value)| (name, value.max(0) as u64))
                .collect(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    tenant_id: String,
    user_id: String,
    email: String,
    status: String,
    locale: String,
}

impl From<MemberRow> for TenantMember {
    fn from(row: MemberRow) -> Self {
        Self {
            tenant_id: TenantId(row.tenant_id),
            user_id: UserId(row.user_id),
            email: row.email,
            status: if row.status == "active" {
                MemberStatus::Active
            } else {
                MemberStatus::Disabled
            },
            locale: Locale::parse(&row.locale),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AssignmentRow {
    user_id: String,
    tenant_id: String,
    role_id: String,
    assigned_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    assigned_by: Option<String>,
}

impl From<AssignmentRow> for RoleAssignment {
    fn from(row: AssignmentRow) -> Self {
        Self {
            user_id: UserId(row.user_id),
            tenant_id: TenantId(row.tenant_id),
            role_id: RoleId(row.role_id),
            assigned_at: row.assigned_at,
            expires_at: row.expires_at,
            assigned_by: row.assigned_by.map(UserId),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: String,
    tenant_id: Option<String>,
    name: String,
    description: String,
    role_level: i16,
    permissions: Vec<String>,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RoleRow> for Role {
    type Error = WaypointError;

    fn try_from(row: RoleRow) -> Result<Self> {
        let permissions = row
            .permissions
            .iter()
            .map(|p| PermissionKey::parse(p))
            .collect::<Result<_>>()?;
        Ok(Self {
            id: RoleId(row.id),
            name: row.name,
            description: row.description,
            role_level: row.role_level.clamp(0, u8::MAX as i16) as u8,
            permissions,
            is_system: row.is_system,
            tenant_id: row.tenant_id.map(TenantId),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl DirectoryStore for PgDirectory {
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, slug, name, status, subscription_tier_id, enabled_modules,
                   is_white_label, custom_domain, module_labels, is_reseller, reseller_parent_id
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(tenant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Tenant::from))
    }

    #[instrument(skip(self), fields(tier_id = %tier_id))]
    async fn subscription_tier(&self, tier_id: &TierId) -> Result<Option<SubscriptionTier>> {
        let row = sqlx::query_as::<_, TierRow>(
            r#"
            SELECT id, name, modules, usage_limits
            FROM subscription_tiers
            WHERE id = $1
            "#,
        )
        .bind(tier_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SubscriptionTier::from))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, user_id = %user_id))]
    async fn member(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<Option<TenantMember>> {
        let row = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT tenant_id, user_id, email, status, locale
            FROM tenant_members
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TenantMember::from))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, user_id = %user_id))]
    async fn role_assignments(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<Vec<RoleAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT user_id, tenant_id, role_id, assigned_at, expires_at, assigned_by
            FROM user_role_assignments
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RoleAssignment::from).collect())
    }

    #[instrument(skip(self, role_ids), fields(count = role_ids.len()))]
    async fn roles(&self, role_ids: &[RoleId]) -> Result<Vec<Role>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = role_ids.iter().map(|id| id.0.clone()).collect();
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT id, tenant_id, name, description, role_level, permissions,
                   is_system, created_at, updated_at
            FROM roles
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Role::try_from).collect()
    }

    async fn tenants_on_tier(&self, tier_id: &TierId) -> Result<Vec<TenantId>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM tenants WHERE subscription_tier_id = $1")
                .bind(tier_id.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(ids.into_iter().map(TenantId).collect())
    }

    async fn reseller_children(&self, tenant_id: &TenantId) -> Result<Vec<TenantId>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM tenants WHERE reseller_parent_id = $1")
                .bind(tenant_id.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(ids.into_iter().map(TenantId).collect())
    }
}
