//! Access decisions: "may user U do P in tenant T".
//!
//! Entitlement is checked first and acts as a hard ceiling: a permission under
//! a module the tenant is not entitled to is denied whatever the user's roles
//! grant. Both lookups go through the [`TieredCache`], so checking many
//! permissions per request (one per navigation node) costs one upstream
//! resolution per TTL window.
//!
//! Every decision produces exactly one audit record. Failures deny.

pub mod middleware;

pub use middleware::{
    AuthenticatedPrincipal, RequirePermissionLayer, RequirePermissionService, UserContextLayer,
    UserContextService,
};

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::audit::AuditLogger;
use crate::cache::{CacheKey, TieredCache};
use crate::directory::DirectoryStore;
use crate::entitlement::{Entitlement, TenantEntitlementResolver};
use crate::error::{Result, WaypointError};
use crate::rbac::{PermissionKey, PermissionStore, ResolvedPermissions, TenantId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Decisions
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a permission check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The user holds no role in the tenant
    NoRole,
    /// The permission's module is outside the tenant's entitlement
    ModuleDisabled,
    /// The user's roles do not grant the permission
    PermissionNotGranted,
    /// Entitlement or permissions could not be resolved
    ResolutionFailed,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRole => "no_role",
            Self::ModuleDisabled => "module_disabled",
            Self::PermissionNotGranted => "permission_not_granted",
            Self::ResolutionFailed => "resolution_failed",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Access Control Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Answers permission checks. Build once at startup and share; clones are cheap.
#[derive(Clone)]
pub struct AccessControlService {
    permissions: PermissionStore,
    entitlements: TenantEntitlementResolver,
    cache: TieredCache,
    audit: AuditLogger,
}

impl AccessControlService {
    pub fn new(
        permissions: PermissionStore,
        entitlements: TenantEntitlementResolver,
        cache: TieredCache,
        audit: AuditLogger,
    ) -> Self {
        Self {
            permissions,
            entitlements,
            cache,
            audit,
        }
    }

    /// Wire the store and resolver over one directory.
    pub fn from_directory(directory: Arc<dyn DirectoryStore>, cache: TieredCache, audit: AuditLogger) -> Self {
        Self::new(
            PermissionStore::new(directory.clone()),
            TenantEntitlementResolver::new(directory),
            cache,
            audit,
        )
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Cached entitlement of a tenant.
    pub async fn entitlement(&self, tenant_id: &TenantId) -> Result<Entitlement> {
        let resolver = self.entitlements.clone();
        let tenant = tenant_id.clone();
        self.cache
            .get_or_compute(&CacheKey::entitlement(tenant_id), move || async move {
                resolver.resolve(&tenant).await
            })
            .await
    }

    /// Cached permission set of a user in a tenant.
    pub async fn permissions(&self, tenant_id: &TenantId, user_id: &UserId) -> Result<ResolvedPermissions> {
        let store = self.permissions.clone();
        let tenant = tenant_id.clone();
        let user = user_id.clone();
        self.cache
            .get_or_compute(&CacheKey::permissions(tenant_id, user_id), move || async move {
                store.resolve_permissions(&user, &tenant).await
            })
            .await
    }

    pub async fn has_permission(&self, tenant_id: &TenantId, user_id: &UserId, permission: &PermissionKey) -> bool {
        self.check_permission(tenant_id, user_id, permission).await.allowed
    }

    /// Decide and audit one permission check.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, user_id = %user_id, permission = %permission))]
    pub async fn check_permission(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        permission: &PermissionKey,
    ) -> AccessDecision {
        let decision = self.decide(tenant_id, user_id, permission).await;
        self.report(tenant_id, user_id, permission, decision)
    }

    /// Decide and audit against an entitlement and permission set the caller
    /// already resolved, so several checks share one snapshot.
    pub fn check_resolved(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        entitlement: &Entitlement,
        resolved: &ResolvedPermissions,
        permission: &PermissionKey,
    ) -> AccessDecision {
        let decision = evaluate(entitlement, resolved, permission);
        self.report(tenant_id, user_id, permission, decision)
    }

    fn report(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        permission: &PermissionKey,
        decision: AccessDecision,
    ) -> AccessDecision {
        let reason = decision.reason.map(|r| r.as_str());
        counter!(
            "waypoint_access_decisions_total",
            "allowed" => if decision.allowed { "true" } else { "false" },
            "reason" => reason.unwrap_or("granted")
        )
        .increment(1);
        debug!(allowed = decision.allowed, reason = reason.unwrap_or(""), "Access decision");

        self.audit
            .record_decision(tenant_id, user_id, permission, decision.allowed, reason);
        decision
    }

    async fn decide(&self, tenant_id: &TenantId, user_id: &UserId, permission: &PermissionKey) -> AccessDecision {
        if tenant_id.ensure_present().is_err() || user_id.ensure_present().is_err() {
            warn!("Permission check with a blank identifier");
            return AccessDecision::deny(DenialReason::ResolutionFailed);
        }

        // Entitlement strictly before permissions.
        let entitlement = match self.entitlement(tenant_id).await {
            Ok(entitlement) => entitlement,
            Err(e) if e.code().is_entitlement() => {
                warn!(error = %e, "Entitlement unresolvable, all modules disabled");
                return AccessDecision::deny(DenialReason::ModuleDisabled);
            }
            Err(e) => {
                warn!(error = %e, "Entitlement resolution failed");
                return AccessDecision::deny(DenialReason::ResolutionFailed);
            }
        };

        if !within_entitlement(&entitlement, permission) {
            return AccessDecision::deny(DenialReason::ModuleDisabled);
        }

        let resolved = match self.permissions(tenant_id, user_id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "Permission resolution failed");
                return AccessDecision::deny(DenialReason::ResolutionFailed);
            }
        };

        evaluate(&entitlement, &resolved, permission)
    }

    /// True on the first granted permission. Each check is audited.
    pub async fn has_any_permission(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        permissions: &[PermissionKey],
    ) -> bool {
        for permission in permissions {
            if self.has_permission(tenant_id, user_id, permission).await {
                return true;
            }
        }
        false
    }

    /// False on the first denied permission. Each check is audited.
    pub async fn has_all_permissions(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        permissions: &[PermissionKey],
    ) -> bool {
        for permission in permissions {
            if !self.has_permission(tenant_id, user_id, permission).await {
                return false;
            }
        }
        true
    }

    /// `Ok` when allowed, a generic `Forbidden` otherwise.
    ///
    /// The error never names the missing permission.
    pub async fn enforce(&self, tenant_id: &TenantId, user_id: &UserId, permission: &PermissionKey) -> Result<()> {
        let decision = self.check_permission(tenant_id, user_id, permission).await;
        if decision.allowed {
            Ok(())
        } else {
            Err(WaypointError::forbidden())
        }
    }
}

/// The module ceiling. The global wildcard names no module and needs at least
/// one entitled module.
fn within_entitlement(entitlement: &Entitlement, permission: &PermissionKey) -> bool {
    match permission.module() {
        Some(module) => entitlement.is_module_enabled(&module),
        None => !entitlement.modules.is_empty(),
    }
}

fn evaluate(entitlement: &Entitlement, resolved: &ResolvedPermissions, permission: &PermissionKey) -> AccessDecision {
    if !within_entitlement(entitlement, permission) {
        AccessDecision::deny(DenialReason::ModuleDisabled)
    } else if !resolved.has_roles() {
        AccessDecision::deny(DenialReason::NoRole)
    } else if resolved.grants(permission) {
        AccessDecision::allow()
    } else {
        AccessDecision::deny(DenialReason::PermissionNotGranted)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditConfig, MemoryAuditSink};
    use crate::cache::CacheConfig;
    use crate::directory::{InMemoryDirectory, SubscriptionTier, Tenant};
    use crate::error::ErrorCode;
    use crate::rbac::{Role, RoleAssignment, RoleId};

    fn key(s: &str) -> PermissionKey {
        PermissionKey::parse(s).unwrap()
    }

    struct Fixture {
        directory: InMemoryDirectory,
        access: AccessControlService,
        sink: Arc<MemoryAuditSink>,
    }

    fn fixture() -> Fixture {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("growth", ["finance", "sales"]));
        directory.upsert_tenant(Tenant::new("t1", "acme", "growth").with_modules(["finance"]));
        directory.add_role(Role::new(
            "finance-admin",
            "Finance Admin",
            6,
            [key("finance.invoices.read"), key("sales.quotes.read")].into_iter().collect(),
        ));
        directory
            .assign_role(RoleAssignment::new(
                UserId::new("u1"),
                TenantId::new("t1"),
                RoleId::new("finance-admin"),
            ))
            .unwrap();

        let sink = Arc::new(MemoryAuditSink::new());
        let audit = AuditLogger::spawn(sink.clone(), &AuditConfig::default());
        let access = AccessControlService::from_directory(
            Arc::new(directory.clone()),
            TieredCache::new(CacheConfig::default()),
            audit,
        );
        Fixture { directory, access, sink }
    }

    #[tokio::test]
    async fn test_module_ceiling_before_permissions() {
        let f = fixture();
        let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));

        assert!(f.access.has_permission(&t1, &u1, &key("finance.invoices.read")).await);

        let decision = f.access.check_permission(&t1, &u1, &key("sales.quotes.read")).await;
        assert_eq!(decision, AccessDecision::deny(DenialReason::ModuleDisabled));
    }

    #[tokio::test]
    async fn test_denial_reasons() {
        let f = fixture();
        let t1 = TenantId::new("t1");

        let decision = f
            .access
            .check_permission(&t1, &UserId::new("stranger"), &key("finance.invoices.read"))
            .await;
        assert_eq!(decision.reason, Some(DenialReason::NoRole));

        let decision = f
            .access
            .check_permission(&t1, &UserId::new("u1"), &key("finance.invoices.delete"))
            .await;
        assert_eq!(decision.reason, Some(DenialReason::PermissionNotGranted));

        let decision = f
            .access
            .check_permission(&TenantId::new("ghost"), &UserId::new("u1"), &key("finance.invoices.read"))
            .await;
        assert_eq!(decision.reason, Some(DenialReason::ModuleDisabled));
    }

    #[tokio::test]
    async fn test_one_audit_record_per_decision() {
        let f = fixture();
        let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));

        f.access.has_permission(&t1, &u1, &key("finance.invoices.read")).await;
        f.access.has_permission(&t1, &u1, &key("sales.quotes.read")).await;
        f.access.audit().shutdown().await;

        let records = f.sink.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].allowed);
        assert_eq!(records[1].reason.as_deref(), Some("module_disabled"));
    }

    #[tokio::test]
    async fn test_decisions_are_cached() {
        let f = fixture();
        let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));

        for _ in 0..10 {
            f.access.has_permission(&t1, &u1, &key("finance.invoices.read")).await;
        }
        let stats = f.access.cache().stats().await.unwrap();
        assert_eq!(stats.computes, 2, "one entitlement and one permission resolution");
    }

    #[tokio::test]
    async fn test_revocation_visible_after_invalidation() {
        let f = fixture();
        let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));
        assert!(f.access.has_permission(&t1, &u1, &key("finance.invoices.read")).await);

        f.directory.revoke_role(&t1, &u1, &RoleId::new("finance-admin"));
        f.access.cache().invalidate_tenant(&t1).await.unwrap();

        let decision = f.access.check_permission(&t1, &u1, &key("finance.invoices.read")).await;
        assert_eq!(decision.reason, Some(DenialReason::NoRole));
    }

    #[tokio::test]
    async fn test_enforce_is_generic() {
        let f = fixture();
        let err = f
            .access
            .enforce(&TenantId::new("t1"), &UserId::new("u1"), &key("sales.quotes.read"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert!(!err.user_message().contains("sales"));
    }

    #[tokio::test]
    async fn test_any_and_all() {
        let f = fixture();
        let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));
        let keys = [key("sales.quotes.read"), key("finance.invoices.read")];

        assert!(f.access.has_any_permission(&t1, &u1, &keys).await);
        assert!(!f.access.has_all_permissions(&t1, &u1, &keys).await);
    }

    #[tokio::test]
    async fn test_blank_identifiers_deny() {
        let f = fixture();
        for (tenant, user) in [("", "u1"), ("  ", "u1"), ("t1", "\t"), ("t1", " ")] {
            let decision = f
                .access
                .check_permission(&TenantId::new(tenant), &UserId::new(user), &key("finance.invoices.read"))
                .await;
            assert_eq!(decision.reason, Some(DenialReason::ResolutionFailed), "{:?}/{:?}", tenant, user);
        }
    }

    #[tokio::test]
    async fn test_global_wildcard_request_needs_an_entitled_module() {
        let f = fixture();
        f.directory.upsert_tenant(Tenant::new("bare", "bare", "growth").with_modules(Vec::<String>::new()));
        f.directory
            .add_role(Role::new("root", "Root", 10, [key("*")].into_iter().collect()));
        f.directory
            .assign_role(RoleAssignment::new(UserId::new("root"), TenantId::new("bare"), RoleId::new("root")))
            .unwrap();
        f.directory
            .assign_role(RoleAssignment::new(UserId::new("root"), TenantId::new("t1"), RoleId::new("root")))
            .unwrap();

        let decision = f
            .access
            .check_permission(&TenantId::new("bare"), &UserId::new("root"), &key("*"))
            .await;
        assert_eq!(decision, AccessDecision::deny(DenialReason::ModuleDisabled));

        assert!(f.access.has_permission(&TenantId::new("t1"), &UserId::new("root"), &key("*")).await);
    }

    #[tokio::test]
    async fn test_check_resolved_matches_live_decision() {
        let f = fixture();
        let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));
        let entitlement = f.access.entitlement(&t1).await.unwrap();
        let resolved = f.access.permissions(&t1, &u1).await.unwrap();

        for permission in ["finance.invoices.read", "sales.quotes.read", "finance.invoices.delete"] {
            let permission = key(permission);
            assert_eq!(
                f.access.check_resolved(&t1, &u1, &entitlement, &resolved, &permission),
                f.access.check_permission(&t1, &u1, &permission).await
            );
        }
    }
}
