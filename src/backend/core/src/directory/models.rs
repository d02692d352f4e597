//! Tenant directory records: tenants, subscription tiers and memberships.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::rbac::{ModuleKey, TenantId, TierId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Tenant
// ═══════════════════════════════════════════════════════════════════════════════

/// Tenant status. Tenants are soft-disabled, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
    Deactivated,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deactivated => "deactivated",
        }
    }

    /// Unknown values map to `Deactivated`.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "suspended" => Self::Suspended,
            _ => Self::Deactivated,
        }
    }
}

/// A customer organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub status: TenantStatus,
    pub subscription_tier_id: TierId,
    /// Tenant-level module switch. `None` means the tenant has not restricted
    /// anything and inherits the full tier module set.
    #[serde(default)]
    pub enabled_modules: Option<BTreeSet<ModuleKey>>,
    #[serde(default)]
    pub is_white_label: bool,
    #[serde(default)]
    pub custom_domain: Option<String>,
    /// White-label label substitutions, keyed by module.
    #[serde(default)]
    pub module_labels: BTreeMap<ModuleKey, String>,
    #[serde(default)]
    pub is_reseller: bool,
    #[serde(default)]
    pub reseller_parent_id: Option<TenantId>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, slug: impl Into<String>, tier: impl Into<String>) -> Self {
        let slug = slug.into();
        Self {
            id: TenantId::new(id),
            name: slug.clone(),
            slug,
            status: TenantStatus::Active,
            subscription_tier_id: TierId::new(tier),
            enabled_modules: None,
            is_white_label: false,
            custom_domain: None,
            module_labels: BTreeMap::new(),
            is_reseller: false,
            reseller_parent_id: None,
        }
    }

    pub fn with_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_modules = Some(modules.into_iter().map(|m| ModuleKey::new(m)).collect());
        self
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.reseller_parent_id = Some(TenantId::new(parent));
        self
    }

    pub fn reseller(mut self) -> Self {
        self.is_reseller = true;
        self
    }

    pub fn white_label(mut self, custom_domain: Option<String>) -> Self {
        self.is_white_label = true;
        self.custom_domain = custom_domain;
        self
    }

    pub fn with_label(mut self, module: impl Into<String>, label: impl Into<String>) -> Self {
        self.module_labels.insert(ModuleKey::new(module), label.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subscription Tier
// ═══════════════════════════════════════════════════════════════════════════════

/// A plan defining the modules and usage limits a tenant may use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionTier {
    pub id: TierId,
    pub name: String,
    #[serde(default)]
    pub modules: BTreeSet<ModuleKey>,
    #[serde(default)]
    pub usage_limits: BTreeMap<String, u64>,
}

impl SubscriptionTier {
    pub fn new<I, S>(id: impl Into<String>, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id: TierId::new(id),
            modules: modules.into_iter().map(|m| ModuleKey::new(m)).collect(),
            usage_limits: BTreeMap::new(),
        }
    }

    pub fn with_limit(mut self, name: impl Into<String>, value: u64) -> Self {
        self.usage_limits.insert(name.into(), value);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Membership
// ═══════════════════════════════════════════════════════════════════════════════

/// UI locale of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ar,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ar => "ar",
        }
    }

    /// Anything that is not Arabic falls back to English.
    pub fn parse(s: &str) -> Self {
        if s.trim().to_ascii_lowercase().starts_with("ar") {
            Self::Ar
        } else {
            Self::En
        }
    }

    pub fn is_rtl(&self) -> bool {
        matches!(self, Self::Ar)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Active,
    Disabled,
}

/// A user's membership in one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMember {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(default)]
    pub locale: Locale,
}

impl TenantMember {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self {
            tenant_id,
            user_id,
            email: String::new(),
            status: MemberStatus::Active,
            locale: Locale::En,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.status = MemberStatus::Disabled;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}
