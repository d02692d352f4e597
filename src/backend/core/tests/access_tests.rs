//! Integration tests for access decisions.
//!
//! These tests run the full path: directory, entitlement, permission store,
//! cache, decision and audit trail.

use std::sync::Arc;

use waypoint_core::audit::{AuditConfig, AuditLogger, MemoryAuditSink, ACTION_PERMISSION_CHECK};
use waypoint_core::cache::{CacheConfig, ChangeEvent, InvalidationBus, TieredCache};
use waypoint_core::prelude::*;

// ============================================================================
// Test Utilities
// ============================================================================

struct Harness {
    directory: InMemoryDirectory,
    access: AccessControlService,
    bus: InvalidationBus,
    sink: Arc<MemoryAuditSink>,
}

fn harness() -> Harness {
    let directory = InMemoryDirectory::with_predefined_roles();
    directory.upsert_tier(SubscriptionTier::new("t1-tier", ["finance", "sales"]));
    directory.upsert_tenant(Tenant::new("t1", "acme", "t1-tier").with_modules(["finance"]));
    directory.add_member(TenantMember::new(TenantId::new("t1"), UserId::new("u1")));
    directory.load_roles(vec![Role::new(
        "finance-sales",
        "Finance and Sales",
        4,
        ["finance.invoices.read", "sales.quotes.read"]
            .into_iter()
            .map(|p| PermissionKey::parse(p).unwrap())
            .collect(),
    )]);
    assign(&directory, "t1", "u1", "finance-sales");

    let shared: Arc<dyn DirectoryStore> = Arc::new(directory.clone());
    let sink = Arc::new(MemoryAuditSink::new());
    let audit = AuditLogger::spawn(sink.clone(), &AuditConfig::default());
    let cache = TieredCache::new(CacheConfig::default());
    let access = AccessControlService::from_directory(shared.clone(), cache.clone(), audit);

    Harness {
        directory,
        access,
        bus: InvalidationBus::new(cache, shared),
        sink,
    }
}

fn assign(directory: &InMemoryDirectory, tenant: &str, user: &str, role: &str) {
    directory
        .assign_role(RoleAssignment::new(UserId::new(user), TenantId::new(tenant), RoleId::new(role)))
        .unwrap();
}

fn key(s: &str) -> PermissionKey {
    PermissionKey::parse(s).unwrap()
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[tokio::test]
async fn test_module_disabled_beats_granted_permission() {
    let h = harness();
    let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));

    let allowed = h.access.check_permission(&t1, &u1, &key("finance.invoices.read")).await;
    assert!(allowed.allowed);
    assert!(allowed.reason.is_none());

    // Granted by the role, but the tenant switched sales off.
    let denied = h.access.check_permission(&t1, &u1, &key("sales.quotes.read")).await;
    assert!(!denied.allowed);
    assert_eq!(denied.reason, Some(DenialReason::ModuleDisabled));
}

#[tokio::test]
async fn test_every_decision_is_audited_once() {
    let h = harness();
    let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));

    h.access.check_permission(&t1, &u1, &key("finance.invoices.read")).await;
    h.access.check_permission(&t1, &u1, &key("sales.quotes.read")).await;
    h.access.check_permission(&t1, &UserId::new("stranger"), &key("finance.invoices.read")).await;

    h.sink.wait_for(3).await;
    let records = h.sink.records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.action == ACTION_PERMISSION_CHECK));
    assert_eq!(
        records.iter().map(|r| r.allowed).collect::<Vec<_>>(),
        vec![true, false, false]
    );
    assert_eq!(records[1].reason.as_deref(), Some("module_disabled"));
    assert_eq!(records[2].reason.as_deref(), Some("no_role"));
}

#[tokio::test]
async fn test_role_union() {
    let h = harness();
    h.directory.load_roles(vec![Role::new(
        "expenses",
        "Expenses",
        2,
        [key("finance.expenses.write")].into_iter().collect(),
    )]);
    assign(&h.directory, "t1", "u1", "expenses");

    let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));
    let resolved = h.access.permissions(&t1, &u1).await.unwrap();
    assert_eq!(resolved.roles.len(), 2);
    assert_eq!(resolved.role_level, 4);
    assert!(resolved.grants(&key("finance.invoices.read")));
    assert!(resolved.grants(&key("finance.expenses.write")));
    assert!(!resolved.grants(&key("finance.expenses.delete")));

    assert!(h.access.has_all_permissions(&t1, &u1, &[key("finance.invoices.read"), key("finance.expenses.write")]).await);
}

#[tokio::test]
async fn test_ceiling_holds_for_global_wildcard() {
    let h = harness();
    h.directory.add_member(TenantMember::new(TenantId::new("t1"), UserId::new("admin")));
    assign(&h.directory, "t1", "admin", PredefinedRole::TenantAdmin.id());

    let (t1, admin) = (TenantId::new("t1"), UserId::new("admin"));
    let entitlement = h.access.entitlement(&t1).await.unwrap();

    for permission in ["finance.invoices.delete", "sales.deals.read", "hr.payroll.read", "crm.customers.write"] {
        let permission = key(permission);
        let decision = h.access.check_permission(&t1, &admin, &permission).await;
        let module = permission.module().unwrap();
        assert_eq!(decision.allowed, entitlement.is_module_enabled(&module), "{}", permission);
    }
}

#[tokio::test]
async fn test_revocation_visible_after_invalidation() {
    let h = harness();
    let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));
    let permission = key("finance.invoices.read");

    assert!(h.access.has_permission(&t1, &u1, &permission).await);

    h.directory.revoke_role(&t1, &u1, &RoleId::new("finance-sales"));
    // Still cached.
    assert!(h.access.has_permission(&t1, &u1, &permission).await);

    h.bus.publish(ChangeEvent::assignment_changed("t1", "u1")).await.unwrap();
    let decision = h.access.check_permission(&t1, &u1, &permission).await;
    assert_eq!(decision.reason, Some(DenialReason::NoRole));
}

#[tokio::test]
async fn test_tenant_update_invalidates_entitlement() {
    let h = harness();
    let (t1, u1) = (TenantId::new("t1"), UserId::new("u1"));

    assert!(!h.access.has_permission(&t1, &u1, &key("sales.quotes.read")).await);

    h.directory
        .upsert_tenant(Tenant::new("t1", "acme", "t1-tier").with_modules(["finance", "sales"]));
    h.bus.publish(ChangeEvent::tenant_updated("t1")).await.unwrap();

    assert!(h.access.has_permission(&t1, &u1, &key("sales.quotes.read")).await);
}

#[tokio::test]
async fn test_enforce_maps_to_forbidden() {
    let h = harness();
    let err = h
        .access
        .enforce(&TenantId::new("t1"), &UserId::new("u1"), &key("sales.quotes.read"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}
