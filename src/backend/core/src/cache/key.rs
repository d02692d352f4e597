//! Typed, tenant-namespaced cache keys.
//!
//! Every key starts with `tenant:{tenant_id}:` so one tenant's entries can be
//! dropped with a single prefix pattern and no key can address another
//! tenant's data. Components are escaped, so an identifier containing `:` or
//! glob characters cannot forge a different prefix.
//!
//! Key layout: `tenant:{tenant}:{kind}[:v{version}][:{segment}]*`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::rbac::{TenantId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// TTL Classes
// ═══════════════════════════════════════════════════════════════════════════════

/// Freshness class of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Volatile data: permission sets, navigation
    Short,
    /// Entitlements
    Medium,
    /// Static reference data
    Long,
}

impl TtlClass {
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(30),
            Self::Medium => Duration::from_secs(300),
            Self::Long => Duration::from_secs(86_400),
        }
    }

    /// How long past its TTL an entry may still be served while it refreshes.
    pub fn default_grace(&self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(30),
            Self::Medium => Duration::from_secs(300),
            Self::Long => Duration::from_secs(3_600),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for TtlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Key Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// What a key caches. Determines its prefix and default TTL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Entitlement,
    Permissions,
    Navigation,
    /// Anything else a caller wants scoped to a tenant
    Custom,
}

impl KeyKind {
    pub fn default_ttl_class(&self) -> TtlClass {
        match self {
            Self::Entitlement => TtlClass::Medium,
            Self::Permissions => TtlClass::Short,
            Self::Navigation => TtlClass::Short,
            Self::Custom => TtlClass::Medium,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Entitlement => "entitlement",
            Self::Permissions => "permissions",
            Self::Navigation => "navigation",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Key
// ═══════════════════════════════════════════════════════════════════════════════

const TENANT_PREFIX: &str = "tenant";

/// A tenant-scoped cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tenant: TenantId,
    kind: KeyKind,
    segments: Vec<String>,
    ttl_class: TtlClass,
    version: Option<u32>,
}

impl CacheKey {
    pub fn new(tenant: &TenantId, kind: KeyKind) -> Self {
        Self {
            tenant: tenant.clone(),
            kind,
            segments: Vec::new(),
            ttl_class: kind.default_ttl_class(),
            version: None,
        }
    }

    /// Entitlement of a tenant.
    pub fn entitlement(tenant: &TenantId) -> Self {
        Self::new(tenant, KeyKind::Entitlement)
    }

    /// Resolved permissions of one user in a tenant.
    pub fn permissions(tenant: &TenantId, user: &UserId) -> Self {
        Self::new(tenant, KeyKind::Permissions).with_segment(user.as_str())
    }

    /// Navigation output for a context digest.
    pub fn navigation(tenant: &TenantId, digest: &str) -> Self {
        Self::new(tenant, KeyKind::Navigation).with_segment(digest)
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn with_ttl_class(mut self, ttl_class: TtlClass) -> Self {
        self.ttl_class = ttl_class;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn ttl_class(&self) -> TtlClass {
        self.ttl_class
    }

    /// Render the storage key.
    pub fn build(&self) -> String {
        let mut key = format!(
            "{}:{}:{}",
            TENANT_PREFIX,
            escape_component(self.tenant.as_str()),
            self.kind.prefix()
        );
        if let Some(version) = self.version {
            key.push_str(&format!(":v{}", version));
        }
        for segment in &self.segments {
            key.push(':');
            key.push_str(&escape_component(segment));
        }
        key
    }

    /// Glob matching every key of a tenant.
    pub fn tenant_pattern(tenant: &TenantId) -> String {
        format!("{}:{}:*", TENANT_PREFIX, escape_component(tenant.as_str()))
    }

    /// Glob matching every key of one kind within a tenant.
    pub fn kind_pattern(tenant: &TenantId, kind: KeyKind) -> String {
        format!(
            "{}:{}:{}*",
            TENANT_PREFIX,
            escape_component(tenant.as_str()),
            kind.prefix()
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// Percent-escape the characters that carry meaning in keys or glob patterns.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '*' => out.push_str("%2A"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
