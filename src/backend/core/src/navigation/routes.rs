//! Route-level access checks.
//!
//! [`RouteTable`] maps path patterns (`/crm/customers/:id`) to the module,
//! role level and permission a page needs. [`RouteGuard::check`] answers
//! whether a user may open a path and where to send them otherwise.

use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::resolve_path;
use super::tree::{NavigationNode, NavigationTree};
use crate::access::{AccessControlService, DenialReason};
use crate::context::UserContext;
use crate::error::{Result, WaypointError};
use crate::rbac::{ModuleKey, PermissionKey};

const DASHBOARD: &str = "/dashboard";
const UPGRADE: &str = "/billing?upgrade=true";

// ═══════════════════════════════════════════════════════════════════════════════
// Rules
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub pattern: String,
    pub module: Option<ModuleKey>,
    pub required_permission: Option<PermissionKey>,
    pub min_role_level: u8,
    matcher: Regex,
}

impl RouteRule {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: pattern.to_string(),
            module: None,
            required_permission: None,
            min_role_level: 0,
            matcher: compile_pattern(pattern)?,
        })
    }

    pub fn module(mut self, module: impl Into<ModuleKey>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn permission(mut self, permission: PermissionKey) -> Self {
        self.required_permission = Some(permission);
        self
    }

    pub fn min_role_level(mut self, level: u8) -> Self {
        self.min_role_level = level;
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// `:name` segments match one path segment, everything else literally.
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for segment in pattern.split('/').filter(|s| !s.is_empty()) {
        re.push('/');
        if segment.starts_with(':') {
            re.push_str("[^/]+");
        } else {
            re.push_str(&regex::escape(segment));
        }
    }
    if re.len() == 1 {
        re.push('/');
    }
    re.push('$');

    Regex::new(&re).map_err(|e| WaypointError::invalid_input(format!("invalid route pattern {}: {}", pattern, e)))
}

/// Ordered rules; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// One rule per navigable entry of `tree`, plus module landing pages for
    /// parents without a path. Children inherit their parent's module.
    pub fn from_tree(tree: &NavigationTree) -> Result<Self> {
        fn walk(node: &NavigationNode, inherited: Option<&ModuleKey>, rules: &mut Vec<RouteRule>) -> Result<()> {
            let module = node.required_module.as_ref().or(inherited);

            let pattern = match (&node.path, node.module_root()) {
                (Some(path), _) if !node.external => Some(path.clone()),
                (None, Some(root)) => Some(format!("/{}", root)),
                _ => None,
            };
            if let Some(pattern) = pattern {
                let mut rule = RouteRule::new(&pattern)?.min_role_level(node.min_role_level);
                rule.module = module.cloned();
                rule.required_permission = node.required_permission.clone();
                rules.push(rule);
            }

            for child in &node.children {
                walk(child, module, rules)?;
            }
            Ok(())
        }

        let mut rules = Vec::new();
        for node in &tree.nodes {
            walk(node, None, &mut rules)?;
        }
        Ok(Self { rules })
    }

    /// Tree routes plus record pages (`new` and detail views).
    pub fn standard(tree: &NavigationTree) -> Result<Self> {
        let p = PermissionKey::parse;
        let mut rules = vec![
            RouteRule::new("/crm/customers/new")?.module("crm").permission(p("crm.customers.write")?).min_role_level(3),
            RouteRule::new("/crm/customers/:id")?.module("crm").permission(p("crm.customers.read")?).min_role_level(3),
            RouteRule::new("/crm/leads/:id")?.module("crm").permission(p("crm.leads.read")?).min_role_level(3),
            RouteRule::new("/sales/deals/new")?.module("sales").permission(p("sales.deals.write")?).min_role_level(3),
            RouteRule::new("/sales/deals/:id")?.module("sales").permission(p("sales.deals.read")?).min_role_level(3),
            RouteRule::new("/finance/invoices/new")?.module("finance").permission(p("finance.invoices.write")?).min_role_level(5),
            RouteRule::new("/finance/invoices/:id")?.module("finance").permission(p("finance.invoices.read")?).min_role_level(5),
            RouteRule::new("/hr/employees/:id")?.module("hr").permission(p("hr.employees.read")?).min_role_level(5),
            RouteRule::new("/teams/new")?.module("teams").min_role_level(7),
            RouteRule::new("/teams/:id")?.module("teams").min_role_level(3),
        ];
        rules.extend(Self::from_tree(tree)?.rules);
        Ok(Self { rules })
    }

    pub fn find(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|r| r.matches(path))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Guard
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDenial {
    RouteNotFound,
    ModuleDisabled,
    InsufficientRoleLevel,
    PermissionDenied,
}

impl RouteDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RouteNotFound => "route_not_found",
            Self::ModuleDisabled => "module_disabled",
            Self::InsufficientRoleLevel => "insufficient_role_level",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

impl fmt::Display for RouteDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteAccess {
    pub allowed: bool,
    pub reason: Option<RouteDenial>,
    /// Where to send the user when denied
    pub redirect: Option<String>,
    /// Matched rule pattern
    pub pattern: Option<String>,
}

impl RouteAccess {
    fn allow(pattern: &str) -> Self {
        Self {
            allowed: true,
            reason: None,
            redirect: None,
            pattern: Some(pattern.to_string()),
        }
    }

    fn deny(reason: RouteDenial, redirect: String, pattern: Option<&str>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            redirect: Some(redirect),
            pattern: pattern.map(str::to_string),
        }
    }
}

#[derive(Clone)]
pub struct RouteGuard {
    access: AccessControlService,
    routes: Arc<RouteTable>,
}

impl RouteGuard {
    pub fn new(access: AccessControlService, routes: RouteTable) -> Self {
        Self {
            access,
            routes: Arc::new(routes),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Whether `ctx` may open `path`.
    ///
    /// Checks run in order: route exists, module enabled, role level, then
    /// the audited permission decision.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id))]
    pub async fn check(&self, ctx: &UserContext, path: &str) -> RouteAccess {
        let relative = tenant_relative(ctx, path);
        let access = self.evaluate(ctx, &relative).await;

        let allowed = if access.allowed { "true" } else { "false" };
        counter!("waypoint_route_checks_total", "allowed" => allowed).increment(1);
        debug!(
            path = %relative,
            allowed = access.allowed,
            reason = access.reason.map(|r| r.as_str()).unwrap_or(""),
            "Route checked"
        );
        access
    }

    async fn evaluate(&self, ctx: &UserContext, relative: &str) -> RouteAccess {
        let dashboard = resolve_path(ctx, DASHBOARD, false);

        let rule = match self.routes.find(relative) {
            Some(rule) => rule,
            None => return RouteAccess::deny(RouteDenial::RouteNotFound, dashboard, None),
        };
        let pattern = Some(rule.pattern.as_str());

        if let Some(module) = &rule.module {
            if !ctx.has_module(module) {
                return RouteAccess::deny(RouteDenial::ModuleDisabled, resolve_path(ctx, UPGRADE, false), pattern);
            }
        }

        if ctx.role_level < rule.min_role_level {
            return RouteAccess::deny(RouteDenial::InsufficientRoleLevel, dashboard, pattern);
        }

        if let Some(permission) = &rule.required_permission {
            let decision = self
                .access
                .check_permission(&ctx.tenant_id, &ctx.user_id, permission)
                .await;
            match decision.reason {
                _ if decision.allowed => {}
                Some(DenialReason::ModuleDisabled) => {
                    return RouteAccess::deny(RouteDenial::ModuleDisabled, resolve_path(ctx, UPGRADE, false), pattern);
                }
                _ => return RouteAccess::deny(RouteDenial::PermissionDenied, dashboard, pattern),
            }
        }

        RouteAccess::allow(&rule.pattern)
    }
}

/// Strip the query, the tenant slug prefix and any trailing slash.
fn tenant_relative(ctx: &UserContext, path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut path = path.trim_end_matches('/');

    if !ctx.uses_custom_domain() {
        let prefix = format!("/{}", ctx.tenant_slug);
        if let Some(rest) = path.strip_prefix(prefix.as_str()) {
            if rest.is_empty() || rest.starts_with('/') {
                path = rest;
            }
        }
    }

    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
