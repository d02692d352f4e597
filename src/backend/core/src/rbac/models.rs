//! RBAC data models: identifiers, permission keys, roles and role assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Result, WaypointError};

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Reject blank identifiers at entry points.
            pub fn ensure_present(&self) -> Result<()> {
                if self.0.trim().is_empty() {
                    return Err(WaypointError::invalid_input(concat!(
                        stringify!($name),
                        " must not be empty"
                    )));
                }
                Ok(())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Strongly-typed user identifier.
    UserId
);
string_id!(
    /// Strongly-typed role identifier.
    RoleId
);
string_id!(
    /// Strongly-typed tenant identifier.
    TenantId
);
string_id!(
    /// Strongly-typed subscription tier identifier.
    TierId
);
string_id!(
    /// A business module such as `finance` or `crm`.
    ModuleKey
);

// ═══════════════════════════════════════════════════════════════════════════════
// Permission Key
// ═══════════════════════════════════════════════════════════════════════════════

/// A dotted permission key, `module.resource.action`.
///
/// Examples:
/// - `finance.invoices.read`
/// - `crm.customers.write`
/// - `finance.*` (everything in the finance module)
/// - `*` (everything)
///
/// The first segment names the module the permission belongs to; module gating
/// is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionKey(String);

impl PermissionKey {
    pub const WILDCARD: &'static str = "*";

    /// Parse and validate a permission key.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(WaypointError::invalid_input("permission key must not be empty"));
        }
        if s == Self::WILDCARD {
            return Ok(Self(s.to_string()));
        }

        let segments: Vec<&str> = s.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let last = i == segments.len() - 1;
            let valid = if *segment == "*" {
                last && i > 0
            } else {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            };
            if !valid {
                return Err(WaypointError::invalid_input(format!("invalid permission key: {}", s)));
            }
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The module this permission belongs to. `None` for the global wildcard.
    pub fn module(&self) -> Option<ModuleKey> {
        if self.is_global_wildcard() {
            return None;
        }
        self.0.split('.').next().map(ModuleKey::from)
    }

    pub fn is_global_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }

    pub fn is_wildcard(&self) -> bool {
        self.is_global_wildcard() || self.0.ends_with(".*")
    }

    /// Whether holding `self` grants `requested`.
    ///
    /// `*` grants everything, `prefix.*` grants every key below `prefix`,
    /// anything else grants only itself.
    pub fn grants(&self, requested: &PermissionKey) -> bool {
        if self.is_global_wildcard() || self == requested {
            return true;
        }
        match self.0.strip_suffix(".*") {
            Some(prefix) => requested
                .0
                .strip_prefix(prefix)
                .map_or(false, |rest| rest.starts_with('.')),
            None => false,
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PermissionKey {
    type Error = WaypointError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PermissionKey> for String {
    fn from(key: PermissionKey) -> Self {
        key.0
    }
}

impl std::str::FromStr for PermissionKey {
    type Err = WaypointError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Whether any key in `granted` grants `requested`.
pub fn set_grants(granted: &BTreeSet<PermissionKey>, requested: &PermissionKey) -> bool {
    granted.contains(requested) || granted.iter().any(|g| g.grants(requested))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// A role groups permission keys under a named identity with a hierarchy level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Hierarchy level, 1 (guest) to 9 (tenant admin).
    pub role_level: u8,
    #[serde(default)]
    pub permissions: BTreeSet<PermissionKey>,
    /// Built-in roles cannot be removed.
    #[serde(default)]
    pub is_system: bool,
    /// Owning tenant; `None` for platform-wide roles.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role_level: u8,
        permissions: BTreeSet<PermissionKey>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RoleId::new(id),
            name: name.into(),
            description: String::new(),
            role_level,
            permissions,
            is_system: false,
            tenant_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn for_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Whether this role may be used inside `tenant`.
    pub fn is_visible_to(&self, tenant: &TenantId) -> bool {
        self.tenant_id.as_ref().map_or(true, |owner| owner == tenant)
    }

    pub fn has_permission(&self, permission: &PermissionKey) -> bool {
        set_grants(&self.permissions, permission)
    }

    pub fn grant(&mut self, permission: PermissionKey) {
        self.permissions.insert(permission);
        self.updated_at = Utc::now();
    }

    pub fn revoke(&mut self, permission: &PermissionKey) -> bool {
        let removed = self.permissions.remove(permission);
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role Assignment
// ═══════════════════════════════════════════════════════════════════════════════

/// Assigns a role to a user inside one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub role_id: RoleId,
    #[serde(default = "Utc::now")]
    pub assigned_at: DateTime<Utc>,
    /// None = never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_by: Option<UserId>,
}

impl RoleAssignment {
    pub fn new(user_id: UserId, tenant_id: TenantId, role_id: RoleId) -> Self {
        Self {
            user_id,
            tenant_id,
            role_id,
            assigned_at: Utc::now(),
            expires_at: None,
            assigned_by: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn assigned_by(mut self, user_id: UserId) -> Self {
        self.assigned_by = Some(user_id);
        self
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
