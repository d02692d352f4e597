//! Per-request user context.
//!
//! [`UserContextLoader::load`] runs once per authenticated request and gathers
//! everything downstream decisions need. It has no cache of its own: role and
//! entitlement come from the same cached accessors the access service uses, so
//! one request sees one consistent snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::access::AccessControlService;
use crate::directory::{DirectoryStore, Locale};
use crate::entitlement::Entitlement;
use crate::error::{Result, WaypointError};
use crate::rbac::{set_grants, ModuleKey, PermissionKey, RoleId, RoleSummary, TenantId, TierId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// User Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolved identity of one request. Never shared across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub tenant_slug: String,
    pub email: String,
    /// Highest-level role, if any
    pub role: Option<RoleId>,
    pub roles: Vec<RoleSummary>,
    pub role_level: u8,
    pub permissions: BTreeSet<PermissionKey>,
    pub subscription_tier: TierId,
    pub enabled_modules: BTreeSet<ModuleKey>,
    pub module_labels: BTreeMap<ModuleKey, String>,
    pub limits: BTreeMap<String, u64>,
    pub is_white_label: bool,
    pub custom_domain: Option<String>,
    pub is_reseller: bool,
    pub locale: Locale,
}

impl UserContext {
    /// Override the membership locale for this request.
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn has_module(&self, module: &ModuleKey) -> bool {
        self.enabled_modules.contains(module)
    }

    /// Whether the loaded permission set grants `permission`. Unaudited; use
    /// [`AccessControlService`] for decisions.
    pub fn grants(&self, permission: &PermissionKey) -> bool {
        set_grants(&self.permissions, permission)
    }

    pub fn module_label(&self, module: &ModuleKey) -> Option<&str> {
        self.module_labels.get(module).map(String::as_str)
    }

    /// Tenant is served from its own domain, so paths carry no slug.
    pub fn uses_custom_domain(&self) -> bool {
        self.is_white_label && self.custom_domain.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Loader
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct UserContextLoader {
    directory: Arc<dyn DirectoryStore>,
    access: AccessControlService,
}

impl UserContextLoader {
    pub fn new(directory: Arc<dyn DirectoryStore>, access: AccessControlService) -> Self {
        Self { directory, access }
    }

    pub fn access(&self) -> &AccessControlService {
        &self.access
    }

    /// Build the context for a user in a tenant.
    ///
    /// Fails with an authentication error when the tenant is unknown or not
    /// active, or the user is not an active member. No partial context is
    /// returned.
    #[instrument(skip(self), fields(user_id = %user_id, tenant_id = %tenant_id))]
    pub async fn load(&self, user_id: &UserId, tenant_id: &TenantId) -> Result<UserContext> {
        if user_id.ensure_present().is_err() || tenant_id.ensure_present().is_err() {
            return Err(WaypointError::unauthenticated("blank user or tenant id"));
        }

        let tenant = self
            .directory
            .tenant(tenant_id)
            .await?
            .ok_or_else(|| WaypointError::unauthenticated(format!("unknown tenant {}", tenant_id)))?;

        if !tenant.is_active() {
            return Err(WaypointError::tenant_suspended(tenant_id));
        }

        let member = self
            .directory
            .member(tenant_id, user_id)
            .await?
            .filter(|m| m.is_active())
            .ok_or_else(|| WaypointError::not_tenant_member(user_id, tenant_id))?;

        let entitlement = match self.access.entitlement(tenant_id).await {
            Ok(entitlement) => entitlement,
            Err(e) if e.code().is_entitlement() => {
                warn!(error = %e, "Entitlement unresolvable, loading context without modules");
                Entitlement::deny_all(tenant_id.clone())
            }
            Err(e) => return Err(e),
        };
        let resolved = self.access.permissions(tenant_id, user_id).await?;

        debug!(
            role_level = resolved.role_level,
            modules = entitlement.modules.len(),
            "Loaded user context"
        );

        Ok(UserContext {
            user_id: user_id.clone(),
            tenant_id: tenant_id.clone(),
            tenant_slug: tenant.slug,
            email: member.email,
            role: resolved.primary_role().map(|r| r.id.clone()),
            roles: resolved.roles,
            role_level: resolved.role_level,
            permissions: resolved.permissions,
            subscription_tier: tenant.subscription_tier_id,
            enabled_modules: entitlement.modules,
            module_labels: entitlement.module_labels,
            limits: entitlement.limits,
            is_white_label: tenant.is_white_label,
            custom_domain: tenant.custom_domain,
            is_reseller: tenant.is_reseller,
            locale: member.locale,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditConfig, AuditLogger, TracingAuditSink};
    use crate::cache::{CacheConfig, TieredCache};
    use crate::directory::{InMemoryDirectory, SubscriptionTier, Tenant, TenantMember, TenantStatus};
    use crate::error::ErrorCode;
    use crate::rbac::{PredefinedRole, RoleAssignment};

    fn loader(directory: &InMemoryDirectory) -> UserContextLoader {
        let shared: Arc<dyn DirectoryStore> = Arc::new(directory.clone());
        let audit = AuditLogger::spawn(Arc::new(TracingAuditSink), &AuditConfig::default());
        let access = AccessControlService::from_directory(shared.clone(), TieredCache::new(CacheConfig::default()), audit);
        UserContextLoader::new(shared, access)
    }

    fn directory() -> InMemoryDirectory {
        let directory = InMemoryDirectory::with_predefined_roles();
        directory.upsert_tier(SubscriptionTier::new("pro", ["dashboard", "finance", "sales"]));
        directory.upsert_tenant(
            Tenant::new("t1", "acme", "pro")
                .reseller()
                .white_label(Some("portal.acme.test".to_string()))
                .with_label("finance", "Money"),
        );
        directory.upsert_tenant(Tenant::new("t2", "frozen", "pro").with_status(TenantStatus::Suspended));
        directory.add_member(
            TenantMember::new(TenantId::new("t1"), UserId::new("u1"))
                .with_email("u1@acme.test")
                .with_locale(Locale::Ar),
        );
        directory.add_member(TenantMember::new(TenantId::new("t2"), UserId::new("u1")));
        directory
            .assign_role(RoleAssignment::new(
                UserId::new("u1"),
                TenantId::new("t1"),
                RoleId::new(PredefinedRole::Manager.id()),
            ))
            .unwrap();
        directory
    }

    #[tokio::test]
    async fn test_load_assembles_context() {
        let ctx = loader(&directory())
            .load(&UserId::new("u1"), &TenantId::new("t1"))
            .await
            .unwrap();

        assert_eq!(ctx.tenant_slug, "acme");
        assert_eq!(ctx.role, Some(RoleId::new(PredefinedRole::Manager.id())));
        assert_eq!(ctx.role_level, 7);
        assert!(ctx.has_module(&ModuleKey::new("finance")));
        assert_eq!(ctx.module_label(&ModuleKey::new("finance")), Some("Money"));
        assert!(ctx.is_white_label && ctx.is_reseller && ctx.uses_custom_domain());
        assert_eq!(ctx.locale, Locale::Ar);
        assert!(ctx.grants(&PermissionKey::parse("finance.invoices.read").unwrap()));
        assert_eq!(ctx.with_locale(Locale::En).locale, Locale::En);
    }

    #[tokio::test]
    async fn test_authentication_failures() {
        let loader = loader(&directory());

        let err = loader.load(&UserId::new("u2"), &TenantId::new("t1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotTenantMember);

        let err = loader.load(&UserId::new("u1"), &TenantId::new("t2")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TenantSuspended);

        let err = loader.load(&UserId::new("u1"), &TenantId::new("nope")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);

        for err in [
            loader.load(&UserId::new(""), &TenantId::new("t1")).await.unwrap_err(),
            loader.load(&UserId::new("   "), &TenantId::new("t1")).await.unwrap_err(),
            loader.load(&UserId::new("u1"), &TenantId::new(" ")).await.unwrap_err(),
            loader.load(&UserId::new("u2"), &TenantId::new("t1")).await.unwrap_err(),
        ] {
            assert!(err.code().is_authentication());
        }
    }

    #[tokio::test]
    async fn test_disabled_member_rejected() {
        let directory = directory();
        directory.add_member(TenantMember::new(TenantId::new("t1"), UserId::new("u3")).disabled());

        let err = loader(&directory)
            .load(&UserId::new("u3"), &TenantId::new("t1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotTenantMember);
    }

    #[tokio::test]
    async fn test_missing_tier_degrades_to_no_modules() {
        let directory = directory();
        directory.upsert_tenant(Tenant::new("t3", "ghost", "missing-tier"));
        directory.add_member(TenantMember::new(TenantId::new("t3"), UserId::new("u1")));

        let ctx = loader(&directory)
            .load(&UserId::new("u1"), &TenantId::new("t3"))
            .await
            .unwrap();
        assert!(ctx.enabled_modules.is_empty());
    }
}
