//! Static navigation definitions.
//!
//! A [`NavigationTree`] is data: nodes with bilingual labels and the
//! requirements a user must meet to see them. The generator filters it per
//! [`crate::context::UserContext`]. Bump [`NavigationTree::version`] whenever
//! the definition changes so cached menus are not reused.

use serde::{Deserialize, Serialize};

use crate::directory::Locale;
use crate::error::Result;
use crate::rbac::{ModuleKey, PermissionKey};

/// Version of [`NavigationTree::standard`].
pub const STANDARD_TREE_VERSION: u32 = 1;

// ═══════════════════════════════════════════════════════════════════════════════
// Labels and Categories
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub en: String,
    pub ar: String,
}

impl Label {
    pub fn new(en: impl Into<String>, ar: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            ar: ar.into(),
        }
    }

    pub fn for_locale(&self, locale: Locale) -> &str {
        match locale {
            Locale::En => &self.en,
            Locale::Ar => &self.ar,
        }
    }
}

/// Navigation group a top-level node belongs to, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Core,
    Operations,
    FinanceHr,
    Governance,
    Analytics,
    AiAutomation,
    Tools,
    /// Shown to reseller tenants only
    Reseller,
}

impl Category {
    pub fn all() -> [Category; 8] {
        [
            Self::Core,
            Self::Operations,
            Self::FinanceHr,
            Self::Governance,
            Self::Analytics,
            Self::AiAutomation,
            Self::Tools,
            Self::Reseller,
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Operations => "operations",
            Self::FinanceHr => "finance-hr",
            Self::Governance => "governance",
            Self::Analytics => "analytics",
            Self::AiAutomation => "ai-automation",
            Self::Tools => "tools",
            Self::Reseller => "reseller",
        }
    }

    pub fn label(&self) -> Label {
        match self {
            Self::Core => Label::new("Core", "الأساسي"),
            Self::Operations => Label::new("Operations", "العمليات"),
            Self::FinanceHr => Label::new("Finance & HR", "المالية والموارد البشرية"),
            Self::Governance => Label::new("Governance", "الحوكمة"),
            Self::Analytics => Label::new("Analytics", "التحليلات"),
            Self::AiAutomation => Label::new("AI & Automation", "الذكاء الاصطناعي والأتمتة"),
            Self::Tools => Label::new("Tools & Integration", "الأدوات والتكامل"),
            Self::Reseller => Label::new("Reseller", "الموزع"),
        }
    }

    /// Core is always open, the reseller group cannot collapse.
    pub fn collapsible(&self) -> bool {
        !matches!(self, Self::Core | Self::Reseller)
    }

    pub fn default_open(&self) -> bool {
        matches!(self, Self::Core | Self::Operations | Self::Reseller)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Node Definitions
// ═══════════════════════════════════════════════════════════════════════════════

/// One entry of the navigation definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationNode {
    pub id: String,
    pub label: Label,
    /// Route relative to the tenant root. `None` for pure grouping parents.
    pub path: Option<String>,
    /// Path is used as is, never tenant-prefixed
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub icon: String,
    pub required_module: Option<ModuleKey>,
    pub required_permission: Option<PermissionKey>,
    #[serde(default)]
    pub min_role_level: u8,
    pub category: Category,
    #[serde(default)]
    pub sort_order: u16,
    #[serde(default)]
    pub children: Vec<NavigationNode>,
}

impl NavigationNode {
    pub fn new(id: impl Into<String>, label: Label) -> Self {
        Self {
            id: id.into(),
            label,
            path: None,
            external: false,
            icon: "Circle".to_string(),
            required_module: None,
            required_permission: None,
            min_role_level: 0,
            category: Category::Core,
            sort_order: 999,
            children: Vec::new(),
        }
    }

    /// A top-level module entry; requires its own module.
    pub fn module(key: &str, label: Label, icon: &str, category: Category, sort_order: u16) -> Self {
        let mut node = Self::new(key, label);
        node.icon = icon.to_string();
        node.required_module = Some(ModuleKey::new(key));
        node.category = category;
        node.sort_order = sort_order;
        node
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn requires_module(mut self, module: impl Into<ModuleKey>) -> Self {
        self.required_module = Some(module.into());
        self
    }

    pub fn requires_permission(mut self, permission: PermissionKey) -> Self {
        self.required_permission = Some(permission);
        self
    }

    pub fn min_role_level(mut self, level: u8) -> Self {
        self.min_role_level = level;
        self
    }

    pub fn in_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_child(mut self, child: NavigationNode) -> Self {
        self.children.push(child);
        self
    }

    /// The module this entry is the root of, when its id is a module key.
    pub fn module_root(&self) -> Option<&ModuleKey> {
        self.required_module.as_ref().filter(|m| m.as_str() == self.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Navigation Tree
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationTree {
    pub version: u32,
    /// Top-level entries, grouped by category when rendered
    pub nodes: Vec<NavigationNode>,
    pub user_menu: Vec<NavigationNode>,
    pub quick_actions: Vec<NavigationNode>,
}

impl NavigationTree {
    pub fn new(version: u32, nodes: Vec<NavigationNode>) -> Self {
        Self {
            version,
            nodes,
            user_menu: Vec::new(),
            quick_actions: Vec::new(),
        }
    }

    /// Top-level entry rooted at `module`.
    pub fn module_node(&self, module: &str) -> Option<&NavigationNode> {
        self.nodes.iter().find(|n| n.id == module && n.module_root().is_some())
    }

    /// The platform's navigation.
    pub fn standard() -> Result<Self> {
        let p = PermissionKey::parse;
        use Category::*;

        let child = |module: &str, segment: &str, label: Label, permission: &str, level: u8| -> Result<NavigationNode> {
            Ok(NavigationNode::new(format!("{}-{}", module, segment), label)
                .with_path(format!("/{}/{}", module, segment))
                .requires_module(module)
                .requires_permission(p(permission)?)
                .min_role_level(level))
        };

        let nodes = vec![
            NavigationNode::module("dashboard", Label::new("Dashboard", "لوحة التحكم"), "LayoutDashboard", Core, 1)
                .with_path("/dashboard")
                .requires_permission(p("dashboard.overview.read")?)
                .min_role_level(1),
            NavigationNode::module("crm", Label::new("CRM", "إدارة العملاء"), "Users", Operations, 2)
                .min_role_level(3)
                .with_child(child("crm", "customers", Label::new("Customers", "العملاء"), "crm.customers.read", 3)?)
                .with_child(child("crm", "leads", Label::new("Leads", "الفرص"), "crm.leads.read", 3)?)
                .with_child(child("crm", "contacts", Label::new("Contacts", "جهات الاتصال"), "crm.contacts.read", 3)?),
            NavigationNode::module("sales", Label::new("Sales", "المبيعات"), "TrendingUp", Operations, 3)
                .min_role_level(3)
                .with_child(child("sales", "pipeline", Label::new("Pipeline", "خط المبيعات"), "sales.pipeline.read", 3)?)
                .with_child(child("sales", "deals", Label::new("Deals", "الصفقات"), "sales.deals.read", 3)?)
                .with_child(child("sales", "quotes", Label::new("Quotes", "عروض الأسعار"), "sales.quotes.read", 3)?),
            NavigationNode::module("finance", Label::new("Finance", "المالية"), "DollarSign", FinanceHr, 4)
                .min_role_level(5)
                .with_child(child("finance", "invoices", Label::new("Invoices", "الفواتير"), "finance.invoices.read", 5)?)
                .with_child(child("finance", "expenses", Label::new("Expenses", "المصروفات"), "finance.expenses.read", 5)?)
                .with_child(child("finance", "reports", Label::new("Reports", "التقارير"), "finance.reports.read", 6)?),
            NavigationNode::module("hr", Label::new("HR", "الموارد البشرية"), "UserCheck", FinanceHr, 5)
                .min_role_level(3)
                .with_child(child("hr", "employees", Label::new("Employees", "الموظفين"), "hr.employees.read", 5)?)
                .with_child(child("hr", "payroll", Label::new("Payroll", "الرواتب"), "hr.payroll.read", 7)?)
                .with_child(child("hr", "leave", Label::new("Leave", "الإجازات"), "hr.leave.read", 3)?),
            NavigationNode::module("procurement", Label::new("Procurement", "المشتريات"), "ShoppingCart", Operations, 6)
                .with_path("/procurement")
                .requires_permission(p("procurement.orders.read")?)
                .min_role_level(5),
            NavigationNode::module("grc", Label::new("GRC", "الحوكمة والامتثال"), "Shield", Governance, 7)
                .with_path("/grc")
                .requires_permission(p("grc.risks.read")?)
                .min_role_level(6),
            NavigationNode::module("analytics", Label::new("Analytics", "التحليلات"), "BarChart", Analytics, 8)
                .with_path("/analytics")
                .requires_permission(p("analytics.dashboards.read")?)
                .min_role_level(5),
            NavigationNode::module("reports", Label::new("Reports", "التقارير"), "FileText", Analytics, 9)
                .with_path("/reports")
                .requires_permission(p("reports.library.read")?)
                .min_role_level(3),
            NavigationNode::module("ai-agents", Label::new("AI Agents", "الوكلاء الذكيون"), "Bot", AiAutomation, 10)
                .with_path("/ai-agents")
                .requires_permission(p("ai-agents.agents.read")?)
                .min_role_level(5),
            NavigationNode::module("workflows", Label::new("Workflows", "سير العمل"), "GitBranch", AiAutomation, 11)
                .with_path("/workflows")
                .requires_permission(p("workflows.runs.read")?)
                .min_role_level(5),
            NavigationNode::module("integrations", Label::new("Integrations", "التكاملات"), "Plug", Tools, 12)
                .with_path("/integrations")
                .requires_permission(p("integrations.connections.read")?)
                .min_role_level(5),
            NavigationNode::module("billing", Label::new("Billing", "الفواتير"), "CreditCard", FinanceHr, 13)
                .with_path("/billing")
                .requires_permission(p("billing.subscriptions.read")?)
                .min_role_level(7),
            NavigationNode::module("monitoring", Label::new("Monitoring", "المراقبة"), "Activity", Tools, 14)
                .with_path("/monitoring")
                .requires_permission(p("monitoring.health.read")?)
                .min_role_level(7),
            NavigationNode::module("teams", Label::new("Teams", "الفرق"), "UsersRound", Core, 15)
                .with_path("/teams")
                .min_role_level(3),
            NavigationNode::module("reseller", Label::new("Reseller Portal", "بوابة الموزع"), "Store", Reseller, 16)
                .with_path("/reseller")
                .requires_permission(p("reseller.clients.read")?)
                .min_role_level(8),
            // Platform section, not a sellable module.
            NavigationNode::new("settings", Label::new("Settings", "الإعدادات"))
                .with_icon("Settings")
                .with_path("/settings")
                .in_category(Core)
                .with_child(
                    NavigationNode::new("settings-profile", Label::new("Profile", "الملف الشخصي")).with_path("/settings/profile"),
                )
                .with_child(
                    NavigationNode::new("settings-teams", Label::new("Team Settings", "إعدادات الفريق"))
                        .with_path("/settings/teams")
                        .min_role_level(7),
                ),
        ]
        .into_iter()
        .map(|mut node| {
            if node.id == "settings" {
                node.sort_order = 99;
            }
            node
        })
        .collect();

        let user_menu = vec![
            NavigationNode::new("profile", Label::new("Profile", "الملف الشخصي"))
                .with_icon("User")
                .with_path("/settings/profile"),
            NavigationNode::new("team-settings", Label::new("Team Settings", "إعدادات الفريق"))
                .with_icon("UsersRound")
                .with_path("/settings/teams")
                .min_role_level(7),
            NavigationNode::new("billing", Label::new("Billing", "الفواتير"))
                .with_icon("CreditCard")
                .with_path("/billing")
                .requires_module("billing")
                .requires_permission(p("billing.subscriptions.read")?)
                .min_role_level(7),
            NavigationNode::new("settings", Label::new("Settings", "الإعدادات"))
                .with_icon("Settings")
                .with_path("/settings"),
            NavigationNode::new("logout", Label::new("Logout", "تسجيل الخروج"))
                .with_icon("LogOut")
                .with_path("/api/auth/logout")
                .external(),
        ];

        let quick_actions = vec![
            NavigationNode::new("new-customer", Label::new("New Customer", "عميل جديد"))
                .with_icon("UserPlus")
                .with_path("/crm/customers/new")
                .requires_module("crm")
                .requires_permission(p("crm.customers.write")?),
            NavigationNode::new("new-deal", Label::new("New Deal", "صفقة جديدة"))
                .with_icon("Plus")
                .with_path("/sales/deals/new")
                .requires_module("sales")
                .requires_permission(p("sales.deals.write")?),
            NavigationNode::new("new-invoice", Label::new("New Invoice", "فاتورة جديدة"))
                .with_icon("FileText")
                .with_path("/finance/invoices/new")
                .requires_module("finance")
                .requires_permission(p("finance.invoices.write")?),
            NavigationNode::new("new-team", Label::new("New Team", "فريق جديد"))
                .with_icon("UsersRound")
                .with_path("/teams/new")
                .requires_module("teams")
                .min_role_level(7),
        ];

        Ok(Self {
            version: STANDARD_TREE_VERSION,
            nodes,
            user_menu,
            quick_actions,
        })
    }
}
