//! Authorization audit trail.
//!
//! [`AuditLogger`] hands records to a dedicated writer task through a bounded
//! buffer. Callers never wait: when the buffer is full the oldest records are
//! dropped and counted. Sink failures are logged and never reach the caller.

pub mod postgres;
pub mod sink;

pub use postgres::PgAuditSink;
pub use sink::{AuditSink, MemoryAuditSink, TracingAuditSink};

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, WaypointError};
use crate::rbac::{PermissionKey, TenantId, UserId};

/// Action recorded for permission checks.
pub const ACTION_PERMISSION_CHECK: &str = "permission.check";

// ═══════════════════════════════════════════════════════════════════════════════
// Audit Record
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub allowed: bool,
    /// Denial reason, when denied
    pub reason: Option<String>,
}

impl AuditRecord {
    pub fn new(
        tenant_id: TenantId,
        user_id: UserId,
        action: impl Into<String>,
        resource: impl Into<String>,
        allowed: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            tenant_id,
            user_id,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            allowed,
            reason: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Where audit records are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Structured log events on the `waypoint::audit` target
    #[default]
    Tracing,
    Postgres,
    /// Kept in process, for tests and fixtures
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Records buffered ahead of the writer before the oldest are dropped
    pub buffer_capacity: usize,
    pub sink: AuditSinkKind,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            sink: AuditSinkKind::Tracing,
        }
    }
}

impl AuditConfig {
    /// The configured sink. `postgres` writes through `pool` and fails
    /// without one.
    pub fn build_sink(&self, pool: Option<PgPool>) -> Result<Arc<dyn AuditSink>> {
        match (self.sink, pool) {
            (AuditSinkKind::Tracing, _) => Ok(Arc::new(TracingAuditSink)),
            (AuditSinkKind::Memory, _) => Ok(Arc::new(MemoryAuditSink::new())),
            (AuditSinkKind::Postgres, Some(pool)) => Ok(Arc::new(PgAuditSink::new(pool))),
            (AuditSinkKind::Postgres, None) => Err(WaypointError::configuration(
                "audit sink `postgres` requires a database connection",
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Audit Logger
// ═══════════════════════════════════════════════════════════════════════════════

/// Fire-and-forget audit writer.
///
/// Cheap to clone; clones feed the same writer.
#[derive(Clone)]
pub struct AuditLogger {
    sender: broadcast::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
    shutdown: CancellationToken,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AuditLogger {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, config: &AuditConfig) -> Self {
        let (sender, receiver) = broadcast::channel(config.buffer_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(run_writer(sink, receiver, dropped.clone(), shutdown.clone()));

        Self {
            sender,
            dropped,
            shutdown,
            writer: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Start the writer over the sink `config` selects.
    pub fn from_config(config: &AuditConfig, pool: Option<PgPool>) -> Result<Self> {
        let sink = config.build_sink(pool)?;
        info!(sink = sink.name(), "Audit sink selected");
        Ok(Self::spawn(sink, config))
    }

    /// Record an event. Never blocks.
    pub fn record(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        action: &str,
        resource: &str,
        resource_id: Option<&str>,
        allowed: bool,
    ) {
        let mut record = AuditRecord::new(tenant_id.clone(), user_id.clone(), action, resource, allowed);
        record.resource_id = resource_id.map(str::to_string);
        self.submit(record);
    }

    /// Record one permission decision.
    pub fn record_decision(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        permission: &PermissionKey,
        allowed: bool,
        reason: Option<&str>,
    ) {
        let mut record = AuditRecord::new(
            tenant_id.clone(),
            user_id.clone(),
            ACTION_PERMISSION_CHECK,
            permission.as_str(),
            allowed,
        );
        record.reason = reason.map(str::to_string);
        self.submit(record);
    }

    /// Record a data access event reported by a CRUD handler.
    pub fn record_data_access(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        action: &str,
        resource: &str,
        resource_id: &str,
    ) {
        let record = AuditRecord::new(
            tenant_id.clone(),
            user_id.clone(),
            format!("data.{}", action),
            resource,
            true,
        )
        .with_resource_id(resource_id);
        self.submit(record);
    }

    pub fn submit(&self, record: AuditRecord) {
        counter!("waypoint_audit_records_total", "allowed" => if record.allowed { "true" } else { "false" })
            .increment(1);
        if self.sender.send(record).is_err() {
            // Writer is gone.
            self.count_dropped(1);
        }
    }

    /// Records lost to overflow or shutdown.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn count_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
        counter!("waypoint_audit_dropped_total").increment(n);
    }

    /// Stop the writer after it has drained the buffer.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Audit writer ended abnormally");
            }
        }
    }
}

async fn run_writer(
    sink: Arc<dyn AuditSink>,
    mut receiver: broadcast::Receiver<AuditRecord>,
    dropped: Arc<AtomicU64>,
    shutdown: CancellationToken,
) {
    let lost = |n: u64| {
        dropped.fetch_add(n, Ordering::Relaxed);
        counter!("waypoint_audit_dropped_total").increment(n);
        warn!(dropped = n, "Audit buffer overflowed, oldest records dropped");
    };

    debug!(sink = sink.name(), "Audit writer started");
    loop {
        tokio::select! {
            biased;
            received = receiver.recv() => match received {
                Ok(record) => write(sink.as_ref(), &record).await,
                Err(RecvError::Lagged(n)) => lost(n),
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.cancelled() => {
                loop {
                    match receiver.try_recv() {
                        Ok(record) => write(sink.as_ref(), &record).await,
                        Err(TryRecvError::Lagged(n)) => lost(n),
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }
    info!(sink = sink.name(), "Audit writer stopped");
}

async fn write(sink: &dyn AuditSink, record: &AuditRecord) {
    if let Err(e) = sink.write(record).await {
        counter!("waypoint_audit_sink_errors_total", "sink" => sink.name()).increment(1);
        warn!(sink = sink.name(), record_id = %record.id, error = %e, "Audit sink write failed");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use async_trait::async_trait;
    use std::time::Duration;

    fn ids() -> (UserId, TenantId) {
        (UserId::new("u1"), TenantId::new("t1"))
    }

    #[tokio::test]
    async fn test_sink_selected_from_config() {
        let mut config = AuditConfig::default();
        assert_eq!(config.build_sink(None).unwrap().name(), "tracing");

        config.sink = AuditSinkKind::Memory;
        assert_eq!(config.build_sink(None).unwrap().name(), "memory");

        config.sink = AuditSinkKind::Postgres;
        let err = config.build_sink(None).err().unwrap();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert!(AuditLogger::from_config(&config, None).is_err());

        config.sink = AuditSinkKind::Tracing;
        let logger = AuditLogger::from_config(&config, None).unwrap();
        logger.shutdown().await;
    }

    #[tokio::test]
    async fn test_records_reach_sink() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::spawn(sink.clone(), &AuditConfig::default());
        let (user, tenant) = ids();

        logger.record(&user, &tenant, "invoice.export", "finance.invoices", Some("inv-1"), true);
        logger.record_decision(
            &tenant,
            &user,
            &PermissionKey::parse("sales.quotes.read").unwrap(),
            false,
            Some("module_disabled"),
        );
        logger.record_data_access(&user, &tenant, "read", "crm.customers", "c-9");

        sink.wait_for(3).await;
        let records = sink.records();
        assert_eq!(records[0].resource_id.as_deref(), Some("inv-1"));
        assert_eq!(records[1].action, ACTION_PERMISSION_CHECK);
        assert_eq!(records[1].reason.as_deref(), Some("module_disabled"));
        assert!(!records[1].allowed);
        assert_eq!(records[2].action, "data.read");
    }

    /// Blocks every write until released.
    struct GatedSink {
        gate: tokio::sync::Semaphore,
        inner: MemoryAuditSink,
    }

    #[async_trait]
    impl AuditSink for GatedSink {
        async fn write(&self, record: &AuditRecord) -> Result<()> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| WaypointError::internal(e.to_string()))?;
            self.inner.write(record).await
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let sink = Arc::new(GatedSink {
            gate: tokio::sync::Semaphore::new(0),
            inner: MemoryAuditSink::new(),
        });
        let config = AuditConfig {
            buffer_capacity: 4,
            ..Default::default()
        };
        let logger = AuditLogger::spawn(sink.clone(), &config);
        let (user, tenant) = ids();

        // The first record is picked up by the writer and parks on the gate.
        logger.record(&user, &tenant, "a", "r0", None, true);
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 1..=10 {
            logger.record(&user, &tenant, "a", &format!("r{}", i), None, true);
        }
        sink.gate.add_permits(100);
        logger.shutdown().await;

        let resources: Vec<String> = sink.inner.records().into_iter().map(|r| r.resource).collect();
        assert_eq!(resources.first().map(String::as_str), Some("r0"));
        assert_eq!(resources.last().map(String::as_str), Some("r10"));
        assert!(!resources.contains(&"r1".to_string()));
        assert_eq!(logger.dropped(), 6);
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn write(&self, _record: &AuditRecord) -> Result<()> {
            Err(WaypointError::store_unavailable("audit store down"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_sink_failure_is_contained() {
        let logger = AuditLogger::spawn(Arc::new(FailingSink), &AuditConfig::default());
        let (user, tenant) = ids();
        logger.record(&user, &tenant, "a", "r", None, false);
        logger.shutdown().await;
        assert_eq!(logger.dropped(), 0);
    }

    #[tokio::test]
    async fn test_records_after_shutdown_count_as_dropped() {
        let logger = AuditLogger::spawn(Arc::new(MemoryAuditSink::new()), &AuditConfig::default());
        logger.shutdown().await;
        let (user, tenant) = ids();
        logger.record(&user, &tenant, "a", "r", None, true);
        assert_eq!(logger.dropped(), 1);
    }
}
