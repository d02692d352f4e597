//! Cache invalidation driven by directory changes.
//!
//! Mutation handlers publish a [`ChangeEvent`] after committing a change. The
//! bus works out which tenants the change can affect and drops their entries
//! before `publish` returns, so the next read recomputes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use super::{CacheKey, KeyKind, TieredCache};
use crate::directory::DirectoryStore;
use crate::entitlement::MAX_RESELLER_DEPTH;
use crate::error::{Result, WaypointError};
use crate::rbac::{RoleId, TenantId, TierId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Change Events
// ═══════════════════════════════════════════════════════════════════════════════

/// A committed change in the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// Tenant config changed: modules, status, labels, reseller parent
    TenantUpdated { tenant_id: TenantId },

    /// A tier's modules or limits changed
    SubscriptionChanged { tier_id: TierId },

    /// A role's permissions changed. `tenant_id` is `None` for platform roles.
    RoleChanged {
        role_id: RoleId,
        tenant_id: Option<TenantId>,
    },

    /// A user gained or lost a role, or their membership changed
    AssignmentChanged { tenant_id: TenantId, user_id: UserId },
}

impl ChangeEvent {
    pub fn tenant_updated(tenant_id: impl Into<TenantId>) -> Self {
        Self::TenantUpdated {
            tenant_id: tenant_id.into(),
        }
    }

    pub fn subscription_changed(tier_id: impl Into<TierId>) -> Self {
        Self::SubscriptionChanged { tier_id: tier_id.into() }
    }

    pub fn role_changed(role_id: impl Into<RoleId>, tenant_id: Option<TenantId>) -> Self {
        Self::RoleChanged {
            role_id: role_id.into(),
            tenant_id,
        }
    }

    pub fn assignment_changed(tenant_id: impl Into<TenantId>, user_id: impl Into<UserId>) -> Self {
        Self::AssignmentChanged {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TenantUpdated { .. } => "tenant_updated",
            Self::SubscriptionChanged { .. } => "subscription_changed",
            Self::RoleChanged { .. } => "role_changed",
            Self::AssignmentChanged { .. } => "assignment_changed",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Invalidation Bus
// ═══════════════════════════════════════════════════════════════════════════════

/// Maps change events onto cache invalidations.
#[derive(Clone)]
pub struct InvalidationBus {
    cache: TieredCache,
    directory: Arc<dyn DirectoryStore>,
    sender: broadcast::Sender<ChangeEvent>,
}

impl InvalidationBus {
    pub fn new(cache: TieredCache, directory: Arc<dyn DirectoryStore>) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            cache,
            directory,
            sender,
        }
    }

    /// Receive every event after it has been applied to the cache.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Apply an event. Returns the number of cache entries removed.
    #[instrument(skip(self), fields(event_type = event.event_type()))]
    pub async fn publish(&self, event: ChangeEvent) -> Result<u64> {
        let removed = match &event {
            ChangeEvent::TenantUpdated { tenant_id } => {
                let tenants = self.with_descendants(vec![tenant_id.clone()]).await?;
                self.invalidate_tenants(&tenants).await?
            }
            ChangeEvent::SubscriptionChanged { tier_id } => {
                let on_tier = self.directory.tenants_on_tier(tier_id).await?;
                let tenants = self.with_descendants(on_tier).await?;
                self.invalidate_tenants(&tenants).await?
            }
            ChangeEvent::RoleChanged {
                tenant_id: Some(tenant_id),
                ..
            } => self.cache.invalidate_tenant(tenant_id).await?,
            ChangeEvent::RoleChanged { tenant_id: None, .. } => {
                info!("Platform role changed, dropping every tenant's entries");
                self.cache.invalidate("tenant:*").await?
            }
            ChangeEvent::AssignmentChanged { tenant_id, user_id } => {
                let mut removed = u64::from(
                    self.cache
                        .invalidate_key(&CacheKey::permissions(tenant_id, user_id))
                        .await?,
                );
                removed += self
                    .cache
                    .invalidate(&CacheKey::kind_pattern(tenant_id, KeyKind::Navigation))
                    .await?;
                removed
            }
        };

        // No subscribers is fine.
        let _ = self.sender.send(event);
        Ok(removed)
    }

    async fn invalidate_tenants(&self, tenants: &BTreeSet<TenantId>) -> Result<u64> {
        let mut removed = 0;
        for tenant in tenants {
            removed += self.cache.invalidate_tenant(tenant).await?;
        }
        Ok(removed)
    }

    /// The given tenants plus the reseller children whose entitlement they cap.
    async fn with_descendants(&self, roots: Vec<TenantId>) -> Result<BTreeSet<TenantId>> {
        let mut seen: BTreeSet<TenantId> = roots.iter().cloned().collect();
        let mut queue: VecDeque<(TenantId, usize)> = roots.into_iter().map(|t| (t, 0)).collect();

        while let Some((tenant, depth)) = queue.pop_front() {
            if depth == MAX_RESELLER_DEPTH {
                continue;
            }
            for child in self.directory.reseller_children(&tenant).await? {
                if seen.insert(child.clone()) {
                    queue.push_back((child, depth + 1));
                }
            }
        }

        debug!(tenants = seen.len(), "Resolved affected tenants");
        Ok(seen)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pattern Matching
// ═══════════════════════════════════════════════════════════════════════════════

/// Compile a glob (`*` any run, `?` one character) into an anchored regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut regex = String::with_capacity(glob.len() * 2);
    regex.push('^');

    for c in glob.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                regex.push('\\');
                regex.push(c);
            }
            _ => regex.push(c),
        }
    }

    regex.push('$');
    Regex::new(&regex).map_err(|e| WaypointError::invalid_input(format!("Invalid invalidation pattern: {}", e)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::directory::{InMemoryDirectory, SubscriptionTier, Tenant};

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("tenant:t1:*").unwrap();
        assert!(re.is_match("tenant:t1:entitlement"));
        assert!(!re.is_match("tenant:t10:entitlement"));
        assert!(!re.is_match("xtenant:t1:entitlement"));

        let re = glob_to_regex("tenant:t?:permissions*").unwrap();
        assert!(re.is_match("tenant:t2:permissions:u1"));

        let re = glob_to_regex("a.b").unwrap();
        assert!(!re.is_match("aXb"));
    }

    fn setup() -> (InMemoryDirectory, TieredCache, InvalidationBus) {
        let directory = InMemoryDirectory::new();
        directory.upsert_tier(SubscriptionTier::new("pro", ["finance"]));
        directory.upsert_tier(SubscriptionTier::new("basic", ["finance"]));
        directory.upsert_tenant(Tenant::new("r", "r", "pro").reseller());
        directory.upsert_tenant(Tenant::new("c", "c", "basic").with_parent("r"));
        directory.upsert_tenant(Tenant::new("gc", "gc", "basic").with_parent("c"));
        directory.upsert_tenant(Tenant::new("other", "other", "basic"));

        let cache = TieredCache::new(CacheConfig::default());
        let bus = InvalidationBus::new(cache.clone(), Arc::new(directory.clone()));
        (directory, cache, bus)
    }

    async fn warm(cache: &TieredCache, tenants: &[&str]) {
        for t in tenants {
            let key = CacheKey::entitlement(&TenantId::new(*t));
            let _: u32 = cache.get_or_compute(&key, || async { Ok(1u32) }).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_tenant_update_reaches_reseller_children() {
        let (_directory, cache, bus) = setup();
        warm(&cache, &["r", "c", "gc", "other"]).await;

        let removed = bus.publish(ChangeEvent::tenant_updated("r")).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_subscription_change_covers_tier_tenants() {
        let (_directory, cache, bus) = setup();
        warm(&cache, &["r", "c", "gc", "other"]).await;

        // basic: c, gc and other (gc is also c's child)
        let removed = bus.publish(ChangeEvent::subscription_changed("basic")).await.unwrap();
        assert_eq!(removed, 3);
    }

    #[tokio::test]
    async fn test_assignment_change_is_user_scoped() {
        let (_directory, cache, bus) = setup();
        let t = TenantId::new("c");
        for user in ["u1", "u2"] {
            let key = CacheKey::permissions(&t, &UserId::new(user));
            let _: u32 = cache.get_or_compute(&key, || async { Ok(1u32) }).await.unwrap();
        }
        let mut events = bus.subscribe();

        let removed = bus.publish(ChangeEvent::assignment_changed("c", "u1")).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().await.unwrap().entries, 1);
        assert_eq!(events.recv().await.unwrap(), ChangeEvent::assignment_changed("c", "u1"));
    }

    #[tokio::test]
    async fn test_platform_role_change_drops_everything() {
        let (_directory, cache, bus) = setup();
        warm(&cache, &["r", "other"]).await;

        let removed = bus.publish(ChangeEvent::role_changed("manager", None)).await.unwrap();
        assert_eq!(removed, 2);
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(ChangeEvent::tenant_updated("t1")).unwrap();
        assert_eq!(json["type"], "tenant_updated");
        assert_eq!(json["tenant_id"], "t1");
    }
}
