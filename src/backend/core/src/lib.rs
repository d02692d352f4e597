#![allow(clippy::result_large_err)]
//! # Waypoint Core
//!
//! Tenant-aware authorization and navigation resolution.
//!
//! ## Architecture
//!
//! - **Directory**: Tenants, tiers, roles, members and assignments, in memory or PostgreSQL
//! - **RBAC**: Dotted permission keys with wildcards, role union per tenant
//! - **Entitlement**: Tier and tenant module sets, capped by reseller parents
//! - **Cache**: TTL classes with stale-while-revalidate, single-flight and tenant-scoped invalidation
//! - **Access**: Module-then-permission decisions, each one audited
//! - **Context**: Per-request user context and axum layers
//! - **Navigation**: Filtered, localized menus, breadcrumbs and route guards
//! - **Audit**: Bounded, drop-oldest, fire-and-forget audit trail
//! - **Telemetry**: Structured logging and metric descriptions

pub mod access;
pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod directory;
pub mod entitlement;
pub mod error;
pub mod navigation;
pub mod rbac;
pub mod telemetry;

pub use error::{ErrorCode, Result, WaypointError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::access::{
        AccessControlService, AccessDecision, AuthenticatedPrincipal, DenialReason, RequirePermissionLayer,
        UserContextLayer,
    };
    pub use crate::audit::{AuditConfig, AuditLogger, AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
    pub use crate::cache::{CacheConfig, CacheKey, ChangeEvent, InvalidationBus, KeyKind, TieredCache, TtlClass};
    pub use crate::config::{Config, DatabaseConfig};
    pub use crate::context::{UserContext, UserContextLoader};
    pub use crate::directory::{
        DirectorySeed, DirectoryStore, InMemoryDirectory, Locale, SubscriptionTier, Tenant, TenantMember,
        TenantStatus,
    };
    pub use crate::entitlement::{Entitlement, TenantEntitlementResolver};
    pub use crate::error::{ErrorCode, Result, WaypointError};
    pub use crate::navigation::{
        Breadcrumb, NavigationGenerator, NavigationMenu, NavigationTree, RouteAccess, RouteGuard, RouteTable,
    };
    pub use crate::rbac::{
        ModuleKey, PermissionKey, PermissionStore, PredefinedRole, ResolvedPermissions, Role, RoleAssignment,
        RoleId, TenantId, TierId, UserId,
    };
}
