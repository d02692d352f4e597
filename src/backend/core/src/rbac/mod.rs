//! Role-based access control primitives.
//!
//! This module provides:
//! - **Models**: typed identifiers, dotted permission keys, roles and role assignments
//! - **Predefined Roles**: tenant admin, manager, employee, member and guest templates
//! - **Permission Store**: flattens a user's roles into an effective permission set
//!
//! Decisions are made by [`crate::access::AccessControlService`], which layers
//! module entitlement on top of what the store resolves.
//!
//! # Usage
//!
//! ```rust,ignore
//! use waypoint_core::rbac::{PermissionKey, PermissionStore};
//!
//! let store = PermissionStore::new(directory);
//! let resolved = store.resolve_permissions(&user_id, &tenant_id).await?;
//! let can_read = resolved.grants(&PermissionKey::parse("finance.invoices.read")?);
//! ```

pub mod models;
pub mod roles;
pub mod store;

pub use models::{
    set_grants, ModuleKey, PermissionKey, Role, RoleAssignment, RoleId, TenantId, TierId, UserId,
};
pub use roles::PredefinedRole;
pub use store::{PermissionStore, ResolvedPermissions, RoleSummary};
