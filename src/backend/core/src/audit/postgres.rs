//! PostgreSQL audit sink writing to `audit_logs`.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{AuditRecord, AuditSink};
use crate::error::Result;

#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, occurred_at, tenant_id, user_id, action, resource, resource_id, allowed, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.timestamp)
        .bind(record.tenant_id.as_str())
        .bind(record.user_id.as_str())
        .bind(&record.action)
        .bind(&record.resource)
        .bind(record.resource_id.as_deref())
        .bind(record.allowed)
        .bind(record.reason.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
