//! Predefined roles with default permission sets and hierarchy levels.
//!
//! | Role          | Level | Description                                              |
//! |---------------|-------|----------------------------------------------------------|
//! | TenantAdmin   | 9     | Everything inside the tenant                             |
//! | Manager       | 7     | Full access to every business module, team management    |
//! | Employee      | 5     | Day-to-day read/write on operational records             |
//! | Member        | 3     | Read access to shared records                            |
//! | Guest         | 1     | Dashboard only                                           |
//!
//! Module gating still applies on top of these: a manager in a tenant without
//! the `hr` module cannot reach `hr.*` permissions.

use std::collections::BTreeSet;

use super::models::{PermissionKey, Role};

/// Predefined role templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredefinedRole {
    TenantAdmin,
    Manager,
    Employee,
    Member,
    Guest,
}

impl PredefinedRole {
    pub fn id(&self) -> &'static str {
        match self {
            Self::TenantAdmin => "tenant_admin",
            Self::Manager => "manager",
            Self::Employee => "employee",
            Self::Member => "member",
            Self::Guest => "guest",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TenantAdmin => "Tenant Admin",
            Self::Manager => "Manager",
            Self::Employee => "Employee",
            Self::Member => "Member",
            Self::Guest => "Guest",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::TenantAdmin => "Full access to every entitled module and tenant settings",
            Self::Manager => "Manage business modules and teams",
            Self::Employee => "Work with operational records",
            Self::Member => "Read shared records",
            Self::Guest => "Dashboard access only",
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Self::TenantAdmin => 9,
            Self::Manager => 7,
            Self::Employee => 5,
            Self::Member => 3,
            Self::Guest => 1,
        }
    }

    fn permission_keys(&self) -> &'static [&'static str] {
        match self {
            Self::TenantAdmin => &["*"],
            Self::Manager => &[
                "dashboard.*",
                "crm.*",
                "sales.*",
                "finance.*",
                "hr.*",
                "procurement.*",
                "grc.*",
                "analytics.*",
                "reports.*",
                "workflows.*",
                "teams.*",
            ],
            Self::Employee => &[
                "dashboard.overview.read",
                "crm.customers.read",
                "crm.customers.write",
                "crm.leads.read",
                "crm.leads.write",
                "crm.contacts.read",
                "sales.pipeline.read",
                "sales.deals.read",
                "sales.deals.write",
                "sales.quotes.read",
                "finance.invoices.read",
                "finance.expenses.read",
                "finance.expenses.write",
                "hr.leave.read",
                "hr.leave.write",
                "reports.library.read",
                "workflows.runs.read",
            ],
            Self::Member => &[
                "dashboard.overview.read",
                "crm.customers.read",
                "sales.deals.read",
                "hr.leave.read",
                "reports.library.read",
            ],
            Self::Guest => &["dashboard.overview.read"],
        }
    }

    /// Return the set of permissions for this predefined role.
    pub fn permissions(&self) -> BTreeSet<PermissionKey> {
        self.permission_keys()
            .iter()
            .filter_map(|k| PermissionKey::parse(k).ok())
            .collect()
    }

    /// Build a full `Role` from this template.
    pub fn to_role(&self) -> Role {
        Role::new(self.id(), self.name(), self.level(), self.permissions())
            .with_description(self.description())
            .system()
    }

    pub fn all() -> Vec<PredefinedRole> {
        vec![
            Self::TenantAdmin,
            Self::Manager,
            Self::Employee,
            Self::Member,
            Self::Guest,
        ]
    }

    pub fn all_defaults() -> Vec<Role> {
        Self::all().into_iter().map(|r| r.to_role()).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
