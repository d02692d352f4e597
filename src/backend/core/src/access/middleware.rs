//! Axum adapters for the HTTP layer.
//!
//! Token verification happens upstream and leaves an [`AuthenticatedPrincipal`]
//! in the request extensions. [`UserContextLayer`] turns it into a
//! [`UserContext`]; [`RequirePermissionLayer`] gates a route on one permission.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/finance/invoices", get(list_invoices))
//!     .layer(RequirePermissionLayer::new(access.clone(), "finance.invoices.read")?)
//!     .layer(UserContextLayer::new(loader.clone()));
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::AccessControlService;
use crate::context::{UserContext, UserContextLoader};
use crate::error::{Result, WaypointError};
use crate::rbac::{PermissionKey, TenantId, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Principal and Extractors
// ═══════════════════════════════════════════════════════════════════════════════

/// Verified caller identity, inserted by the token verification layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub user_id: UserId,
    pub tenant_id: TenantId,
}

impl AuthenticatedPrincipal {
    pub fn new(user_id: impl Into<UserId>, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

/// Handlers take `UserContext` as an argument once [`UserContextLayer`] ran.
#[axum::async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<UserContext>().cloned().ok_or_else(|| {
            WaypointError::internal("UserContext missing from request extensions, is UserContextLayer applied?")
                .into_response()
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// User Context Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Loads the [`UserContext`] for the request principal.
///
/// Requests without a principal, or whose principal fails to load, are
/// rejected with the loader's authentication error.
#[derive(Clone)]
pub struct UserContextLayer {
    loader: UserContextLoader,
}

impl UserContextLayer {
    pub fn new(loader: UserContextLoader) -> Self {
        Self { loader }
    }
}

impl<S> Layer<S> for UserContextLayer {
    type Service = UserContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UserContextService {
            inner,
            loader: self.loader.clone(),
        }
    }
}

#[derive(Clone)]
pub struct UserContextService<S> {
    inner: S,
    loader: UserContextLoader,
}

impl<S> Service<Request<Body>> for UserContextService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let loader = self.loader.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let principal = match request.extensions().get::<AuthenticatedPrincipal>().cloned() {
                Some(principal) => principal,
                None => {
                    return Ok(WaypointError::unauthenticated("no principal on request").into_response());
                }
            };

            match loader.load(&principal.user_id, &principal.tenant_id).await {
                Ok(ctx) => {
                    request.extensions_mut().insert(ctx);
                    inner.call(request).await
                }
                Err(e) => {
                    e.log();
                    Ok(e.into_response())
                }
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Require Permission Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Rejects requests whose user lacks one permission.
///
/// Must run after [`UserContextLayer`]. Denials return a generic 403 that does
/// not name the permission.
#[derive(Clone)]
pub struct RequirePermissionLayer {
    access: AccessControlService,
    permission: PermissionKey,
}

impl RequirePermissionLayer {
    pub fn new(access: AccessControlService, permission: &str) -> Result<Self> {
        Ok(Self {
            access,
            permission: PermissionKey::parse(permission)?,
        })
    }

    pub fn from_permission(access: AccessControlService, permission: PermissionKey) -> Self {
        Self { access, permission }
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService {
            inner,
            access: self.access.clone(),
            permission: self.permission.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    access: AccessControlService,
    permission: PermissionKey,
}

impl<S> Service<Request<Body>> for RequirePermissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let access = self.access.clone();
        let permission = self.permission.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (tenant_id, user_id) = match request.extensions().get::<UserContext>() {
                Some(ctx) => (ctx.tenant_id.clone(), ctx.user_id.clone()),
                None => {
                    return Ok(WaypointError::unauthenticated("permission check without user context").into_response());
                }
            };

            let decision = access.check_permission(&tenant_id, &user_id, &permission).await;
            if !decision.allowed {
                warn!(
                    user_id = %user_id,
                    tenant_id = %tenant_id,
                    permission = %permission,
                    reason = decision.reason.map(|r| r.as_str()).unwrap_or(""),
                    "Permission denied"
                );
                return Ok(WaypointError::forbidden().into_response());
            }

            inner.call(request).await
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditConfig, AuditLogger, TracingAuditSink};
    use crate::cache::{CacheConfig, TieredCache};
    use crate::directory::{DirectoryStore, InMemoryDirectory, SubscriptionTier, Tenant, TenantMember};
    use crate::rbac::{PredefinedRole, RoleAssignment, RoleId};
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let directory = InMemoryDirectory::with_predefined_roles();
        directory.upsert_tier(SubscriptionTier::new("pro", ["dashboard", "finance", "crm"]));
        directory.upsert_tenant(Tenant::new("t1", "acme", "pro"));
        for user in ["employee", "guest"] {
            directory.add_member(TenantMember::new(TenantId::new("t1"), UserId::new(user)));
        }
        directory
            .assign_role(RoleAssignment::new(
                UserId::new("employee"),
                TenantId::new("t1"),
                RoleId::new(PredefinedRole::Employee.id()),
            ))
            .unwrap();
        directory
            .assign_role(RoleAssignment::new(
                UserId::new("guest"),
                TenantId::new("t1"),
                RoleId::new(PredefinedRole::Guest.id()),
            ))
            .unwrap();

        let shared: Arc<dyn DirectoryStore> = Arc::new(directory);
        let audit = AuditLogger::spawn(Arc::new(TracingAuditSink), &AuditConfig::default());
        let access = AccessControlService::from_directory(shared.clone(), TieredCache::new(CacheConfig::default()), audit);
        let loader = UserContextLoader::new(shared, access.clone());

        Router::new()
            .route("/invoices", get(|ctx: UserContext| async move { ctx.tenant_slug }))
            .layer(RequirePermissionLayer::new(access, "finance.invoices.read").unwrap())
            .layer(UserContextLayer::new(loader))
    }

    fn request(principal: Option<AuthenticatedPrincipal>) -> Request<Body> {
        let mut request = Request::builder().uri("/invoices").body(Body::empty()).unwrap();
        if let Some(principal) = principal {
            request.extensions_mut().insert(principal);
        }
        request
    }

    #[tokio::test]
    async fn test_allowed_request_reaches_handler() {
        let response = app()
            .oneshot(request(Some(AuthenticatedPrincipal::new("employee", "t1"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_denied_request_is_generic_forbidden() {
        let response = app()
            .oneshot(request(Some(AuthenticatedPrincipal::new("guest", "t1"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("finance.invoices.read"));
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        let response = app().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_non_member_is_rejected() {
        let response = app()
            .oneshot(request(Some(AuthenticatedPrincipal::new("outsider", "t1"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
