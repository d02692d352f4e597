//! Navigation resolution.
//!
//! [`NavigationGenerator`] filters the static [`NavigationTree`] for one
//! [`UserContext`] and renders grouped, flat, user-menu and quick-action
//! views. Each menu is rendered from one entitlement and permission snapshot
//! and cached per tenant under a digest of that snapshot plus the display
//! fields, so users with identical effective access share one entry.

pub mod routes;
pub mod tree;

pub use routes::{RouteAccess, RouteDenial, RouteGuard, RouteRule, RouteTable};
pub use tree::{Category, Label, NavigationNode, NavigationTree, STANDARD_TREE_VERSION};

use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::access::AccessControlService;
use crate::cache::CacheKey;
use crate::context::UserContext;
use crate::directory::Locale;
use crate::entitlement::Entitlement;
use crate::error::Result;
use crate::rbac::{ModuleKey, PermissionKey, ResolvedPermissions, RoleId};

// ═══════════════════════════════════════════════════════════════════════════════
// Rendered Menu
// ═══════════════════════════════════════════════════════════════════════════════

/// A navigation entry after filtering, localized and with a concrete path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavItem {
    pub id: String,
    pub label: String,
    pub path: Option<String>,
    pub icon: String,
    pub module: Option<ModuleKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavItem>,
}

impl NavItem {
    pub fn find(&self, id: &str) -> Option<&NavItem> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavGroup {
    pub id: String,
    pub label: String,
    pub collapsible: bool,
    pub default_open: bool,
    pub items: Vec<NavItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationMenu {
    pub tree_version: u32,
    pub locale: Locale,
    pub rtl: bool,
    pub grouped: Vec<NavGroup>,
    /// Every reachable entry with a path, in module order
    pub flat: Vec<NavItem>,
    pub user_menu: Vec<NavItem>,
    pub quick_actions: Vec<NavItem>,
}

impl NavigationMenu {
    /// Look up an entry anywhere in the grouped view.
    pub fn find(&self, id: &str) -> Option<&NavItem> {
        self.grouped
            .iter()
            .flat_map(|g| g.items.iter())
            .find_map(|item| item.find(id))
    }

    pub fn group(&self, id: &str) -> Option<&NavGroup> {
        self.grouped.iter().find(|g| g.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub label: String,
    pub path: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Generator
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct NavigationGenerator {
    access: AccessControlService,
    tree: Arc<NavigationTree>,
}

impl NavigationGenerator {
    pub fn new(access: AccessControlService, tree: NavigationTree) -> Self {
        Self {
            access,
            tree: Arc::new(tree),
        }
    }

    /// Generator over [`NavigationTree::standard`].
    pub fn standard(access: AccessControlService) -> Result<Self> {
        Ok(Self::new(access, NavigationTree::standard()?))
    }

    pub fn tree(&self) -> &NavigationTree {
        &self.tree
    }

    /// Cached navigation for `ctx`.
    ///
    /// Access is read fresh from the access service rather than from the
    /// context, so a context loaded before a role change renders and caches
    /// under the access it will actually be filtered with.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id))]
    pub async fn generate(&self, ctx: &UserContext) -> Result<NavigationMenu> {
        let snapshot = self.snapshot(ctx).await?;
        let digest = menu_digest(self.tree.version, ctx, &snapshot.entitlement, &snapshot.resolved)?;
        let key = CacheKey::navigation(&ctx.tenant_id, &digest);

        let this = self.clone();
        let ctx = ctx.clone();
        self.access
            .cache()
            .get_or_compute(&key, move || async move { Ok(this.render(&ctx, &snapshot)) })
            .await
    }

    /// Build the menu without consulting the navigation cache.
    pub async fn build(&self, ctx: &UserContext) -> Result<NavigationMenu> {
        let snapshot = self.snapshot(ctx).await?;
        Ok(self.render(ctx, &snapshot))
    }

    async fn snapshot(&self, ctx: &UserContext) -> Result<AccessSnapshot> {
        let entitlement = match self.access.entitlement(&ctx.tenant_id).await {
            Ok(entitlement) => entitlement,
            Err(e) if e.code().is_entitlement() => Entitlement::deny_all(ctx.tenant_id.clone()),
            Err(e) => return Err(e),
        };
        let resolved = self.access.permissions(&ctx.tenant_id, &ctx.user_id).await?;
        Ok(AccessSnapshot { entitlement, resolved })
    }

    fn render(&self, ctx: &UserContext, snapshot: &AccessSnapshot) -> NavigationMenu {
        let view = View { ctx, snapshot };

        let mut top: Vec<(&NavigationNode, NavItem)> = self
            .tree
            .nodes
            .iter()
            .filter(|node| node.category != Category::Reseller || ctx.is_reseller)
            .filter_map(|node| self.filter(node, &view).map(|item| (node, item)))
            .collect();
        top.sort_by_key(|(node, _)| node.sort_order);

        let grouped = Category::all()
            .into_iter()
            .filter_map(|category| {
                let items: Vec<NavItem> = top
                    .iter()
                    .filter(|(node, _)| node.category == category)
                    .map(|(_, item)| item.clone())
                    .collect();
                if items.is_empty() {
                    return None;
                }
                Some(NavGroup {
                    id: category.id().to_string(),
                    label: category.label().for_locale(ctx.locale).to_string(),
                    collapsible: category.collapsible(),
                    default_open: category.default_open(),
                    items,
                })
            })
            .collect();

        let mut flat = Vec::new();
        for (_, item) in &top {
            flatten_into(item, &mut flat);
        }

        let user_menu = self.filter_all(&self.tree.user_menu, &view);
        let quick_actions = self.filter_all(&self.tree.quick_actions, &view);

        counter!("waypoint_navigation_builds_total", "locale" => ctx.locale.as_str()).increment(1);
        debug!(items = flat.len(), "Built navigation");

        NavigationMenu {
            tree_version: self.tree.version,
            locale: ctx.locale,
            rtl: ctx.locale.is_rtl(),
            grouped,
            flat,
            user_menu,
            quick_actions,
        }
    }

    fn filter_all(&self, nodes: &[NavigationNode], view: &View<'_>) -> Vec<NavItem> {
        nodes.iter().filter_map(|node| self.filter(node, view)).collect()
    }

    fn filter(&self, node: &NavigationNode, view: &View<'_>) -> Option<NavItem> {
        if !self.admits(node, view) {
            return None;
        }

        let children = self.filter_all(&node.children, view);
        if !node.children.is_empty() && children.is_empty() && node.path.is_none() {
            return None;
        }

        Some(NavItem {
            id: node.id.clone(),
            label: localized_label(node, view.ctx.locale, &view.snapshot.entitlement.module_labels),
            path: node.path.as_deref().map(|p| resolve_path(view.ctx, p, node.external)),
            icon: node.icon.clone(),
            module: node.required_module.clone(),
            children,
        })
    }

    fn admits(&self, node: &NavigationNode, view: &View<'_>) -> bool {
        let AccessSnapshot { entitlement, resolved } = view.snapshot;
        if resolved.role_level < node.min_role_level {
            return false;
        }
        if let Some(module) = &node.required_module {
            if !entitlement.is_module_enabled(module) {
                return false;
            }
        }
        match &node.required_permission {
            Some(permission) => {
                self.access
                    .check_resolved(&view.ctx.tenant_id, &view.ctx.user_id, entitlement, resolved, permission)
                    .allowed
            }
            None => true,
        }
    }

    /// Trail from the dashboard to `path`.
    ///
    /// `path` may carry the tenant slug. Id-like segments render as a details
    /// crumb.
    pub fn breadcrumbs(&self, ctx: &UserContext, path: &str) -> Vec<Breadcrumb> {
        let dashboard = self
            .tree
            .module_node("dashboard")
            .map(|n| localized_label(n, ctx.locale, &ctx.module_labels))
            .unwrap_or_else(|| "Dashboard".to_string());
        let mut crumbs = vec![Breadcrumb {
            label: dashboard,
            path: resolve_path(ctx, "/dashboard", false),
        }];

        let path = path.split('?').next().unwrap_or_default();
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.first() == Some(&ctx.tenant_slug.as_str()) {
            segments.remove(0);
        }
        if segments.first() == Some(&"dashboard") {
            segments.remove(0);
        }

        let mut current = String::new();
        for segment in segments {
            current.push('/');
            current.push_str(segment);

            let label = if looks_like_id(segment) {
                match ctx.locale {
                    Locale::En => "Details".to_string(),
                    Locale::Ar => "التفاصيل".to_string(),
                }
            } else if let Some(node) = self.lookup(&current) {
                localized_label(node, ctx.locale, &ctx.module_labels)
            } else {
                title_case(segment)
            };

            crumbs.push(Breadcrumb {
                label,
                path: resolve_path(ctx, &current, false),
            });
        }
        crumbs
    }

    fn lookup(&self, relative: &str) -> Option<&NavigationNode> {
        fn walk<'a>(nodes: &'a [NavigationNode], relative: &str) -> Option<&'a NavigationNode> {
            nodes.iter().find_map(|n| {
                if n.path.as_deref() == Some(relative) {
                    Some(n)
                } else {
                    walk(&n.children, relative)
                }
            })
        }

        walk(&self.tree.nodes, relative).or_else(|| {
            let module = relative.trim_start_matches('/');
            self.tree.module_node(module)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Access a menu is rendered from.
struct AccessSnapshot {
    entitlement: Entitlement,
    resolved: ResolvedPermissions,
}

struct View<'a> {
    ctx: &'a UserContext,
    snapshot: &'a AccessSnapshot,
}

#[derive(Serialize)]
struct DigestInput<'a> {
    tree_version: u32,
    role: Option<&'a RoleId>,
    role_level: u8,
    permissions: &'a BTreeSet<PermissionKey>,
    enabled_modules: &'a BTreeSet<ModuleKey>,
    module_labels: &'a BTreeMap<ModuleKey, String>,
    locale: Locale,
    tenant_slug: &'a str,
    custom_domain: bool,
    is_reseller: bool,
}

/// Hex SHA-256 over everything a rendered menu depends on: the access
/// snapshot plus the display fields of `ctx`.
pub fn menu_digest(
    tree_version: u32,
    ctx: &UserContext,
    entitlement: &Entitlement,
    resolved: &ResolvedPermissions,
) -> Result<String> {
    let input = DigestInput {
        tree_version,
        role: resolved.primary_role().map(|r| &r.id),
        role_level: resolved.role_level,
        permissions: &resolved.permissions,
        enabled_modules: &entitlement.modules,
        module_labels: &entitlement.module_labels,
        locale: ctx.locale,
        tenant_slug: &ctx.tenant_slug,
        custom_domain: ctx.uses_custom_domain(),
        is_reseller: ctx.is_reseller,
    };
    let bytes = serde_json::to_vec(&input)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Tenant-relative path as the browser sees it.
pub fn resolve_path(ctx: &UserContext, path: &str, external: bool) -> String {
    if external || ctx.uses_custom_domain() {
        path.to_string()
    } else {
        format!("/{}{}", ctx.tenant_slug, path)
    }
}

fn localized_label(node: &NavigationNode, locale: Locale, labels: &BTreeMap<ModuleKey, String>) -> String {
    if locale == Locale::En {
        if let Some(custom) = node.module_root().and_then(|m| labels.get(m)) {
            return custom.clone();
        }
    }
    node.label.for_locale(locale).to_string()
}

fn flatten_into(item: &NavItem, out: &mut Vec<NavItem>) {
    if item.path.is_some() {
        out.push(NavItem {
            children: Vec::new(),
            ..item.clone()
        });
    }
    for child in &item.children {
        flatten_into(child, out);
    }
}

/// UUIDs and numeric ids.
fn looks_like_id(segment: &str) -> bool {
    let uuid = segment.len() == 36 && segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    uuid || (!segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
}

fn title_case(segment: &str) -> String {
    segment
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::{AuditConfig, AuditLogger, TracingAuditSink};
    use crate::cache::{CacheConfig, TieredCache};
    use crate::context::UserContextLoader;
    use crate::directory::{DirectoryStore, InMemoryDirectory, SubscriptionTier, Tenant, TenantMember};
    use crate::rbac::{PredefinedRole, RoleAssignment, TenantId, UserId};

    pub(crate) struct Fixture {
        pub loader: UserContextLoader,
        pub generator: NavigationGenerator,
    }

    pub(crate) fn fixture() -> Fixture {
        let directory = InMemoryDirectory::with_predefined_roles();
        directory.upsert_tier(SubscriptionTier::new(
            "pro",
            ["dashboard", "crm", "sales", "finance", "hr", "reports", "teams", "billing", "reseller"],
        ));
        directory.upsert_tenant(Tenant::new("t1", "acme", "pro"));
        directory.upsert_tenant(Tenant::new("t2", "partner", "pro").reseller());
        directory.upsert_tenant(
            Tenant::new("t3", "brand", "pro")
                .white_label(Some("portal.brand.test".to_string()))
                .with_label("finance", "Money"),
        );

        let members = [
            ("t1", "admin", PredefinedRole::TenantAdmin),
            ("t1", "manager", PredefinedRole::Manager),
            ("t1", "employee", PredefinedRole::Employee),
            ("t1", "employee2", PredefinedRole::Employee),
            ("t1", "member", PredefinedRole::Member),
            ("t1", "guest", PredefinedRole::Guest),
            ("t2", "admin", PredefinedRole::TenantAdmin),
            ("t3", "manager", PredefinedRole::Manager),
        ];
        for (tenant, user, role) in members {
            directory.add_member(TenantMember::new(TenantId::new(tenant), UserId::new(user)));
            directory
                .assign_role(RoleAssignment::new(
                    UserId::new(user),
                    TenantId::new(tenant),
                    RoleId::new(role.id()),
                ))
                .unwrap();
        }

        let shared: Arc<dyn DirectoryStore> = Arc::new(directory);
        let audit = AuditLogger::spawn(Arc::new(TracingAuditSink), &AuditConfig::default());
        let access = AccessControlService::from_directory(shared.clone(), TieredCache::new(CacheConfig::default()), audit);
        Fixture {
            loader: UserContextLoader::new(shared, access.clone()),
            generator: NavigationGenerator::standard(access).unwrap(),
        }
    }

    impl Fixture {
        pub async fn ctx(&self, tenant: &str, user: &str) -> UserContext {
            self.loader
                .load(&UserId::new(user), &TenantId::new(tenant))
                .await
                .unwrap()
        }
    }

    fn ids(items: &[NavItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_employee_navigation() {
        let f = fixture();
        let ctx = f.ctx("t1", "employee").await;
        let menu = f.generator.generate(&ctx).await.unwrap();

        let finance = menu.find("finance").unwrap();
        assert!(finance.path.is_none());
        assert_eq!(ids(&finance.children), vec!["finance-invoices", "finance-expenses"]);
        assert_eq!(finance.children[0].path.as_deref(), Some("/acme/finance/invoices"));

        let hr = menu.find("hr").unwrap();
        assert_eq!(ids(&hr.children), vec!["hr-leave"]);

        // Not entitled, or above the employee's level.
        assert!(menu.find("procurement").is_none());
        assert!(menu.find("billing").is_none());

        assert_eq!(
            ids(&menu.quick_actions),
            vec!["new-customer", "new-deal"]
        );
        assert_eq!(ids(&menu.user_menu), vec!["profile", "settings", "logout"]);
        assert_eq!(menu.user_menu[2].path.as_deref(), Some("/api/auth/logout"));
    }

    #[tokio::test]
    async fn test_guest_sees_only_dashboard_and_settings() {
        let f = fixture();
        let ctx = f.ctx("t1", "guest").await;
        let menu = f.generator.generate(&ctx).await.unwrap();

        let core = menu.group("core").unwrap();
        assert_eq!(ids(&core.items), vec!["dashboard", "settings"]);
        assert_eq!(menu.grouped.len(), 1);
        assert!(menu.quick_actions.is_empty());
    }

    #[tokio::test]
    async fn test_groups_and_flat_order() {
        let f = fixture();
        let ctx = f.ctx("t1", "manager").await;
        let menu = f.generator.generate(&ctx).await.unwrap();

        let groups: Vec<&str> = menu.grouped.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(groups, vec!["core", "operations", "finance-hr", "analytics"]);

        let flat = ids(&menu.flat);
        assert_eq!(flat.first(), Some(&"dashboard"));
        assert_eq!(flat.last(), Some(&"settings-teams"));
        assert!(flat.contains(&"crm-customers"));
        assert!(!flat.contains(&"crm"));
        assert!(menu.flat.iter().all(|i| i.children.is_empty()));

        assert_eq!(
            ids(&menu.quick_actions),
            vec!["new-customer", "new-deal", "new-invoice", "new-team"]
        );
    }

    #[tokio::test]
    async fn test_reseller_group_only_for_resellers() {
        let f = fixture();

        let plain = f.generator.generate(&f.ctx("t1", "admin").await).await.unwrap();
        assert!(plain.group("reseller").is_none());
        assert!(plain.find("reseller").is_none());

        let reseller = f.generator.generate(&f.ctx("t2", "admin").await).await.unwrap();
        let group = reseller.group("reseller").unwrap();
        assert_eq!(ids(&group.items), vec!["reseller"]);
        assert_eq!(group.items[0].path.as_deref(), Some("/partner/reseller"));
    }

    #[tokio::test]
    async fn test_white_label_labels_and_paths() {
        let f = fixture();
        let ctx = f.ctx("t3", "manager").await;
        let menu = f.generator.generate(&ctx).await.unwrap();

        let finance = menu.find("finance").unwrap();
        assert_eq!(finance.label, "Money");
        assert_eq!(finance.children[0].path.as_deref(), Some("/finance/invoices"));
        assert_eq!(menu.find("dashboard").unwrap().path.as_deref(), Some("/dashboard"));

        // Substitution applies to the English label only.
        let arabic = f.generator.generate(&ctx.with_locale(Locale::Ar)).await.unwrap();
        assert_eq!(arabic.find("finance").unwrap().label, "المالية");
    }

    #[tokio::test]
    async fn test_arabic_locale() {
        let f = fixture();
        let ctx = f.ctx("t1", "employee").await.with_locale(Locale::Ar);
        let menu = f.generator.generate(&ctx).await.unwrap();

        assert!(menu.rtl);
        assert_eq!(menu.group("core").unwrap().label, "الأساسي");
        assert_eq!(menu.find("crm-customers").unwrap().label, "العملاء");
        assert_eq!(menu.quick_actions[0].label, "عميل جديد");
    }

    #[tokio::test]
    async fn test_pruning_keeps_parents_with_paths() {
        let f = fixture();
        let p = |s: &str| PermissionKey::parse(s).unwrap();
        let tree = NavigationTree::new(
            7,
            vec![
                NavigationNode::module("hr", Label::new("HR", "الموارد البشرية"), "UserCheck", Category::FinanceHr, 1)
                    .with_child(
                        NavigationNode::new("hr-payroll", Label::new("Payroll", "الرواتب"))
                            .with_path("/hr/payroll")
                            .requires_permission(p("hr.payroll.read")),
                    ),
                NavigationNode::new("settings", Label::new("Settings", "الإعدادات"))
                    .with_path("/settings")
                    .with_child(
                        NavigationNode::new("settings-teams", Label::new("Teams", "الفرق"))
                            .with_path("/settings/teams")
                            .min_role_level(7),
                    ),
                NavigationNode::new("audit", Label::new("Audit", "التدقيق"))
                    .with_path("/audit")
                    .requires_permission(p("grc.audit.read")),
            ],
        );
        let generator = NavigationGenerator::new(f.generator.access.clone(), tree);

        let ctx = f.ctx("t1", "member").await;
        let menu = generator.build(&ctx).await.unwrap();

        assert!(menu.find("hr").is_none());
        assert!(menu.find("audit").is_none());
        let settings = menu.find("settings").unwrap();
        assert!(settings.children.is_empty());
        assert_eq!(ids(&menu.flat), vec!["settings"]);
    }

    #[tokio::test]
    async fn test_identical_contexts_share_cache_entry() {
        let f = fixture();
        let a = f.ctx("t1", "employee").await;
        let b = f.ctx("t1", "employee2").await;
        let digest = |ctx: &UserContext, snapshot: &AccessSnapshot| {
            menu_digest(STANDARD_TREE_VERSION, ctx, &snapshot.entitlement, &snapshot.resolved).unwrap()
        };
        let (snap_a, snap_b) = (f.generator.snapshot(&a).await.unwrap(), f.generator.snapshot(&b).await.unwrap());
        assert_eq!(digest(&a, &snap_a), digest(&b, &snap_b));

        let cache = f.generator.access.cache().clone();
        let first = f.generator.generate(&a).await.unwrap();
        let computes = cache.stats().await.unwrap().computes;
        let second = f.generator.generate(&b).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.stats().await.unwrap().computes, computes);

        let other_locale = digest(&a.clone().with_locale(Locale::Ar), &snap_a);
        assert_ne!(other_locale, digest(&a, &snap_a));
    }

    #[tokio::test]
    async fn test_breadcrumbs() {
        let f = fixture();
        let ctx = f.ctx("t1", "employee").await;
        let id = "3f2b8c1e-9a7d-4e2b-8f1a-2c3d4e5f6a7b";

        let crumbs = f.generator.breadcrumbs(&ctx, &format!("/acme/crm/customers/{}?tab=notes", id));
        let labels: Vec<&str> = crumbs.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Dashboard", "CRM", "Customers", "Details"]);
        assert_eq!(crumbs[0].path, "/acme/dashboard");
        assert_eq!(crumbs[3].path, format!("/acme/crm/customers/{}", id));

        let crumbs = f.generator.breadcrumbs(&ctx.clone().with_locale(Locale::Ar), "/acme/crm/customers");
        let labels: Vec<&str> = crumbs.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["لوحة التحكم", "إدارة العملاء", "العملاء"]);

        let crumbs = f.generator.breadcrumbs(&ctx, "/acme/purchase-orders");
        assert_eq!(crumbs[1].label, "Purchase Orders");
    }

    #[test]
    fn test_helpers() {
        assert!(looks_like_id("42"));
        assert!(looks_like_id("3f2b8c1e-9a7d-4e2b-8f1a-2c3d4e5f6a7b"));
        assert!(!looks_like_id("customers"));
        assert_eq!(title_case("ai-agents"), "Ai Agents");
    }
}
