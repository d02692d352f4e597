//! Tenant entitlement resolution.
//!
//! A tenant's entitlement is the set of business modules (and usage limits) it
//! may use. It is computed from three sources, each of which can only narrow the
//! result:
//!
//! 1. the subscription tier's module set
//! 2. the tenant's own module switch (optional)
//! 3. the entitlement of its reseller parent, applied up to
//!    [`MAX_RESELLER_DEPTH`] ancestor levels
//!
//! White-label tenants may rename modules they already have. Labels never add
//! modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::directory::{DirectoryStore, Tenant};
use crate::error::{Result, WaypointError};
use crate::rbac::{ModuleKey, TenantId, TierId};

/// Number of reseller ancestor levels whose entitlement caps a tenant.
pub const MAX_RESELLER_DEPTH: usize = 2;

// ═══════════════════════════════════════════════════════════════════════════════
// Entitlement
// ═══════════════════════════════════════════════════════════════════════════════

/// The modules and limits a tenant is allowed to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub tenant_id: TenantId,
    pub tier_id: Option<TierId>,
    pub modules: BTreeSet<ModuleKey>,
    pub limits: BTreeMap<String, u64>,
    pub white_label: bool,
    /// Display label overrides, restricted to `modules`.
    pub module_labels: BTreeMap<ModuleKey, String>,
    /// Reseller ancestors whose entitlement was applied, nearest first.
    pub ceiling_chain: Vec<TenantId>,
    pub computed_at: DateTime<Utc>,
}

impl Entitlement {
    /// An entitlement with no modules. Used when resolution fails.
    pub fn deny_all(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            tier_id: None,
            modules: BTreeSet::new(),
            limits: BTreeMap::new(),
            white_label: false,
            module_labels: BTreeMap::new(),
            ceiling_chain: Vec::new(),
            computed_at: Utc::now(),
        }
    }

    pub fn is_module_enabled(&self, module: &ModuleKey) -> bool {
        self.modules.contains(module)
    }

    pub fn limit(&self, name: &str) -> Option<u64> {
        self.limits.get(name).copied()
    }

    pub fn label_for(&self, module: &ModuleKey) -> Option<&str> {
        self.module_labels.get(module).map(String::as_str)
    }

    /// Narrow this entitlement to what `ceiling` allows.
    fn apply_ceiling(&mut self, ceiling: &Entitlement) {
        self.modules.retain(|m| ceiling.modules.contains(m));
        for (name, cap) in &ceiling.limits {
            self.limits
                .entry(name.clone())
                .and_modify(|v| *v = (*v).min(*cap))
                .or_insert(*cap);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════════════

/// Computes entitlements from the directory. Stateless; cache the output.
#[derive(Clone)]
pub struct TenantEntitlementResolver {
    directory: Arc<dyn DirectoryStore>,
}

impl TenantEntitlementResolver {
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self { directory }
    }

    /// Resolve the effective entitlement of a tenant.
    ///
    /// Fails with `TenantNotFound` / `SubscriptionTierNotFound` when the tenant,
    /// one of its applied ancestors, or a tier is missing.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn resolve(&self, tenant_id: &TenantId) -> Result<Entitlement> {
        tenant_id.ensure_present()?;
        let tenant = self.load_tenant(tenant_id).await?;
        let mut entitlement = self.own_entitlement(&tenant).await?;

        let mut next = tenant.reseller_parent_id.clone();
        while let Some(parent_id) = next.take() {
            if entitlement.ceiling_chain.len() == MAX_RESELLER_DEPTH {
                warn!(
                    ancestor = %parent_id,
                    max_depth = MAX_RESELLER_DEPTH,
                    "Reseller chain deeper than supported, ignoring further ancestors"
                );
                break;
            }
            if parent_id == tenant.id || entitlement.ceiling_chain.contains(&parent_id) {
                warn!(ancestor = %parent_id, "Reseller cycle detected");
                break;
            }

            let parent = self.load_tenant(&parent_id).await?;
            let ceiling = self.own_entitlement(&parent).await?;
            entitlement.apply_ceiling(&ceiling);
            entitlement.ceiling_chain.push(parent_id);
            next = parent.reseller_parent_id.clone();
        }

        let modules = &entitlement.modules;
        entitlement.module_labels.retain(|m, _| modules.contains(m));

        debug!(
            modules = entitlement.modules.len(),
            ancestors = entitlement.ceiling_chain.len(),
            "Resolved entitlement"
        );
        Ok(entitlement)
    }

    async fn load_tenant(&self, tenant_id: &TenantId) -> Result<Tenant> {
        self.directory
            .tenant(tenant_id)
            .await?
            .ok_or_else(|| WaypointError::tenant_not_found(tenant_id))
    }

    /// Tier ∩ tenant switch, without any reseller ceiling.
    async fn own_entitlement(&self, tenant: &Tenant) -> Result<Entitlement> {
        let tier = self
            .directory
            .subscription_tier(&tenant.subscription_tier_id)
            .await?
            .ok_or_else(|| WaypointError::tier_not_found(&tenant.subscription_tier_id))?;

        let modules = if !tenant.is_active() {
            debug!(tenant_id = %tenant.id, status = tenant.status.as_str(), "Tenant inactive, no modules");
            BTreeSet::new()
        } else {
            match &tenant.enabled_modules {
                Some(enabled) => tier.modules.intersection(enabled).cloned().collect(),
                None => tier.modules.clone(),
            }
        };

        let module_labels = if tenant.is_white_label {
            tenant.module_labels.clone()
        } else {
            BTreeMap::new()
        };

        Ok(Entitlement {
            tenant_id: tenant.id.clone(),
            tier_id: Some(tier.id),
            modules,
            limits: tier.usage_limits,
            white_label: tenant.is_white_label,
            module_labels,
            ceiling_chain: Vec::new(),
            computed_at: Utc::now(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryDirectory, SubscriptionTier, TenantStatus};
    use crate::error::ErrorCode;

    fn modules(list: &[&str]) -> BTreeSet<ModuleKey> {
        list.iter().map(|m| ModuleKey::new(*m)).collect()
    }

    fn resolver(directory: &InMemoryDirectory) -> TenantEntitlementResolver {
        TenantEntitlementResolver::new(Arc::new(directory.clone()))
    }

    #[tokio::test]
    async fn test_tier_intersect_tenant_switch() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("pro", ["finance", "sales"]));
        directory.upsert_tenant(Tenant::new("t1", "acme", "pro").with_modules(["finance", "hr"]));

        let ent = resolver(&directory).resolve(&TenantId::new("t1")).await.unwrap();
        assert_eq!(ent.modules, modules(&["finance"]));
    }

    #[tokio::test]
    async fn test_no_switch_inherits_tier() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("pro", ["finance", "sales"]));
        directory.upsert_tenant(Tenant::new("t1", "acme", "pro"));

        let ent = resolver(&directory).resolve(&TenantId::new("t1")).await.unwrap();
        assert_eq!(ent.modules, modules(&["finance", "sales"]));
    }

    #[tokio::test]
    async fn test_reseller_ceiling() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("reseller", ["finance", "sales", "hr"]).with_limit("users", 50));
        directory.upsert_tier(
            SubscriptionTier::new("enterprise", ["finance", "sales", "hr", "procurement"]).with_limit("users", 500),
        );
        directory.upsert_tenant(Tenant::new("r", "reseller", "reseller").reseller());
        directory.upsert_tenant(Tenant::new("c", "child", "enterprise").with_parent("r"));

        let ent = resolver(&directory).resolve(&TenantId::new("c")).await.unwrap();
        assert_eq!(ent.modules, modules(&["finance", "sales", "hr"]));
        assert_eq!(ent.limit("users"), Some(50));
        assert_eq!(ent.ceiling_chain, vec![TenantId::new("r")]);
    }

    #[tokio::test]
    async fn test_reseller_depth_is_bounded() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("all", ["finance", "sales", "hr"]));
        directory.upsert_tier(SubscriptionTier::new("finance_only", ["finance"]));
        // g3 -> g2 -> g1 -> c; g3 is beyond the supported depth.
        directory.upsert_tenant(Tenant::new("g3", "g3", "finance_only"));
        directory.upsert_tenant(Tenant::new("g2", "g2", "all").with_parent("g3"));
        directory.upsert_tenant(Tenant::new("g1", "g1", "all").with_parent("g2"));
        directory.upsert_tenant(Tenant::new("c", "c", "all").with_parent("g1"));

        let ent = resolver(&directory).resolve(&TenantId::new("c")).await.unwrap();
        assert_eq!(ent.ceiling_chain.len(), MAX_RESELLER_DEPTH);
        assert_eq!(ent.modules, modules(&["finance", "sales", "hr"]));

        // g1's own resolution does reach g3.
        let ent = resolver(&directory).resolve(&TenantId::new("g1")).await.unwrap();
        assert_eq!(ent.modules, modules(&["finance"]));
    }

    #[tokio::test]
    async fn test_white_label_labels_never_expand() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("pro", ["finance", "sales"]));
        directory.upsert_tenant(
            Tenant::new("t1", "acme", "pro")
                .white_label(Some("portal.acme.test".to_string()))
                .with_label("finance", "Money")
                .with_label("hr", "People"),
        );

        let ent = resolver(&directory).resolve(&TenantId::new("t1")).await.unwrap();
        assert_eq!(ent.modules, modules(&["finance", "sales"]));
        assert_eq!(ent.label_for(&ModuleKey::new("finance")), Some("Money"));
        assert_eq!(ent.label_for(&ModuleKey::new("hr")), None);
    }

    #[tokio::test]
    async fn test_labels_ignored_without_white_label() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("pro", ["finance"]));
        directory.upsert_tenant(Tenant::new("t1", "acme", "pro").with_label("finance", "Money"));

        let ent = resolver(&directory).resolve(&TenantId::new("t1")).await.unwrap();
        assert!(ent.module_labels.is_empty());
    }

    #[tokio::test]
    async fn test_suspended_parent_caps_to_nothing() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("pro", ["finance"]));
        directory.upsert_tenant(Tenant::new("r", "r", "pro").with_status(TenantStatus::Suspended));
        directory.upsert_tenant(Tenant::new("c", "c", "pro").with_parent("r"));

        let ent = resolver(&directory).resolve(&TenantId::new("c")).await.unwrap();
        assert!(ent.modules.is_empty());
    }

    #[tokio::test]
    async fn test_missing_records_are_entitlement_errors() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tenant(Tenant::new("t1", "acme", "ghost-tier"));
        directory.upsert_tier(SubscriptionTier::new("pro", ["finance"]));
        directory.upsert_tenant(Tenant::new("orphan", "orphan", "pro").with_parent("gone"));

        let r = resolver(&directory);
        let err = r.resolve(&TenantId::new("nope")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TenantNotFound);

        let err = r.resolve(&TenantId::new("t1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SubscriptionTierNotFound);

        let err = r.resolve(&TenantId::new("orphan")).await.unwrap_err();
        assert!(err.code().is_entitlement());
    }

    #[tokio::test]
    async fn test_blank_tenant_id_rejected() {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("pro", ["finance"]));
        directory.upsert_tenant(Tenant::new(" ", "blank", "pro"));

        let r = resolver(&directory);
        for id in ["", " "] {
            let err = r.resolve(&TenantId::new(id)).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidInput);
            assert!(!err.code().is_entitlement());
        }
    }
}
