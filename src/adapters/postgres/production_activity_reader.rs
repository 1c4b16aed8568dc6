//! Read-only view of the production tracker's activity table.
//!
//! The table belongs to the production-tracking service; this adapter only
//! counts distinct lines and never writes.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, TenantId, Timestamp};
use crate::ports::ProductionActivityReader;

pub struct PostgresProductionActivityReader {
    pool: PgPool,
}

impl PostgresProductionActivityReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductionActivityReader for PostgresProductionActivityReader {
    async fn count_active_lines(
        &self,
        tenant_id: &TenantId,
        since: Timestamp,
    ) -> Result<u32, DomainError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT line_id)
            FROM production_activity
            WHERE tenant_id = $1 AND recorded_at >= $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(since.as_datetime())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to count active lines: {}", e)))?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}
