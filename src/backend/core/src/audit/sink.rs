//! Audit sinks.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::info;

use super::AuditRecord;
use crate::error::Result;

/// Destination of audit records. Called from the writer task only.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &AuditRecord) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Emits each record as a structured `tracing` event with target `audit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<()> {
        info!(
            target: "audit",
            audit_id = %record.id,
            tenant_id = %record.tenant_id,
            user_id = %record.user_id,
            action = %record.action,
            resource = %record.resource,
            resource_id = record.resource_id.as_deref().unwrap_or(""),
            allowed = record.allowed,
            reason = record.reason.as_deref().unwrap_or(""),
            "AUDIT"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Keeps records in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    notify: Notify,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` records have been written.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        self.notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
