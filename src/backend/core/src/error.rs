//! Error handling for Waypoint Core.
//!
//! One error type, [`WaypointError`], carries a machine-readable [`ErrorCode`], a
//! message that is safe to show to clients and an optional internal message that
//! only ever reaches the logs.
//!
//! Authorization denials are *not* errors: [`crate::access::AccessDecision`] carries
//! the outcome and reason. `ErrorCode::Forbidden` is only produced when a caller
//! explicitly asks to turn a denial into an error (`AccessControlService::enforce`).
//!
//! # Usage
//!
//! ```rust,ignore
//! use waypoint_core::error::{ErrorCode, ErrorContext, Result};
//!
//! async fn load(pool: &PgPool) -> Result<Row> {
//!     sqlx::query("select 1")
//!         .fetch_one(pool)
//!         .await
//!         .with_error_code(ErrorCode::StoreQueryFailed)
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Waypoint operations.
pub type Result<T> = std::result::Result<T, WaypointError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication (1000-1099)
    Unauthenticated,
    NotTenantMember,
    TenantSuspended,

    // Entitlement (1100-1199)
    TenantNotFound,
    SubscriptionTierNotFound,

    // Authorization (1200-1299)
    Forbidden,

    // Cache (2000-2099)
    CacheComputeFailed,

    // Store (2100-2199)
    StoreUnavailable,
    StoreQueryFailed,

    // Serialization (2200-2299)
    SerializationError,
    DeserializationError,

    // Validation (4100-4199)
    InvalidInput,

    // Configuration (5000-5099)
    ConfigurationError,

    // Internal (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::Unauthenticated => 1000,
            Self::NotTenantMember => 1001,
            Self::TenantSuspended => 1002,

            Self::TenantNotFound => 1100,
            Self::SubscriptionTierNotFound => 1101,

            Self::Forbidden => 1200,

            Self::CacheComputeFailed => 2000,

            Self::StoreUnavailable => 2100,
            Self::StoreQueryFailed => 2101,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::InvalidInput => 4100,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,

            // Entitlement failures are reported like denials so tenant existence
            // is not observable from outside.
            Self::NotTenantMember
            | Self::TenantSuspended
            | Self::TenantNotFound
            | Self::SubscriptionTierNotFound
            | Self::Forbidden => StatusCode::FORBIDDEN,

            Self::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,

            Self::CacheComputeFailed | Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            Self::StoreQueryFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable by the caller.
    ///
    /// The core never retries on its own.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CacheComputeFailed | Self::StoreUnavailable | Self::StoreQueryFailed
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "authentication",
            1100..=1199 => "entitlement",
            1200..=1299 => "authorization",
            2000..=2099 => "cache",
            2100..=2199 => "store",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Whether this code belongs to the authentication family.
    pub const fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::NotTenantMember | Self::TenantSuspended
        )
    }

    /// Whether this code belongs to the entitlement family.
    ///
    /// Callers degrade these to "all modules disabled".
    pub const fn is_entitlement(&self) -> bool {
        matches!(self, Self::TenantNotFound | Self::SubscriptionTierNotFound)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown tenant, not a member)
    Low,
    /// Degraded operation (compute failures, missing tiers)
    Medium,
    /// System errors (store failures, serialization bugs)
    High,
    /// Errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::Unauthenticated
            | ErrorCode::NotTenantMember
            | ErrorCode::TenantSuspended
            | ErrorCode::TenantNotFound
            | ErrorCode::Forbidden
            | ErrorCode::InvalidInput => Self::Low,

            ErrorCode::SubscriptionTierNotFound | ErrorCode::CacheComputeFailed => Self::Medium,

            ErrorCode::StoreQueryFailed
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::StoreUnavailable | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (tenant, tier, user)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Waypoint Core.
#[derive(Error, Debug)]
pub struct WaypointError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for WaypointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl WaypointError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create an authentication error.
    ///
    /// The client only ever sees a generic message.
    pub fn unauthenticated(internal: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::Unauthenticated, "Authentication required", internal)
    }

    /// The user has no active membership in the tenant.
    pub fn not_tenant_member(user_id: impl fmt::Display, tenant_id: impl fmt::Display) -> Self {
        Self::with_internal(
            ErrorCode::NotTenantMember,
            "Access to this workspace is not permitted",
            format!("user {} is not an active member of tenant {}", user_id, tenant_id),
        )
        .with_details(ErrorDetails::new().with_entity("tenant", tenant_id.to_string()))
    }

    /// The tenant exists but is suspended or deactivated.
    pub fn tenant_suspended(tenant_id: impl fmt::Display) -> Self {
        Self::with_internal(
            ErrorCode::TenantSuspended,
            "This workspace is currently unavailable",
            format!("tenant {} is not active", tenant_id),
        )
        .with_details(ErrorDetails::new().with_entity("tenant", tenant_id.to_string()))
    }

    /// Create a tenant not found error.
    pub fn tenant_not_found(tenant_id: impl fmt::Display) -> Self {
        Self::with_internal(
            ErrorCode::TenantNotFound,
            "Access to this workspace is not permitted",
            format!("tenant not found: {}", tenant_id),
        )
        .with_details(ErrorDetails::new().with_entity("tenant", tenant_id.to_string()))
    }

    /// Create a subscription tier not found error.
    pub fn tier_not_found(tier_id: impl fmt::Display) -> Self {
        Self::with_internal(
            ErrorCode::SubscriptionTierNotFound,
            "Access to this workspace is not permitted",
            format!("subscription tier not found: {}", tier_id),
        )
        .with_details(ErrorDetails::new().with_entity("subscription_tier", tier_id.to_string()))
    }

    /// Create a generic forbidden error. Never names the missing permission.
    pub fn forbidden() -> Self {
        Self::new(ErrorCode::Forbidden, "You do not have access to this resource")
    }

    /// Create a cache compute failure.
    pub fn cache_compute(key: impl Into<String>, message: impl Into<String>) -> Self {
        let key = key.into();
        Self::with_internal(
            ErrorCode::CacheComputeFailed,
            "The request could not be completed, try again",
            format!("compute for {} failed: {}", key, message.into()),
        )
        .with_context("key", &key)
    }

    /// Create a store unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StoreUnavailable,
            "The request could not be completed, try again",
            message,
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::ConfigurationError, "Configuration error", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Copy this error into a new, source-less instance.
    ///
    /// Shared computations hand one failure to many waiters; each gets its own copy
    /// with the same code and messages.
    pub fn duplicate(&self) -> Self {
        Self {
            code: self.code,
            user_message: self.user_message.clone(),
            internal_message: self
                .internal_message
                .clone()
                .or_else(|| self.source.as_ref().map(|s| s.to_string())),
            details: self.details.clone(),
            source: None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "request failed"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    internal_message = ?self.internal_message,
                    "request degraded"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    internal_message = ?self.internal_message,
                    "request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "waypoint_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Error information for API responses. Never includes internal messages.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&WaypointError> for ErrorResponse {
    fn from(error: &WaypointError) -> Self {
        // Entity details would reveal tenant or tier identifiers on denial paths.
        let details = match error.code.category() {
            "validation" if !error.details.is_empty() => Some(error.details.clone()),
            _ => None,
        };
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details,
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for WaypointError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| WaypointError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| {
            WaypointError::with_internal(code, "The request could not be completed", e.to_string())
                .with_source(e)
        })
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| WaypointError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| WaypointError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for WaypointError {
    fn from(error: sqlx::Error) -> Self {
        let code = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ErrorCode::StoreUnavailable
            }
            _ => ErrorCode::StoreQueryFailed,
        };

        Self::with_internal(code, "The request could not be completed, try again", error.to_string())
            .with_source(error)
    }
}

impl From<serde_json::Error> for WaypointError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process cached data", error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for WaypointError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(ErrorCode::ConfigurationError, "Configuration error", error.to_string())
    }
}

impl From<std::io::Error> for WaypointError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An I/O error occurred", error.to_string())
            .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
