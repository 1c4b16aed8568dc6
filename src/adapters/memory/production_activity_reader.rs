//! In-memory production activity log.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, TenantId, Timestamp};
use crate::ports::ProductionActivityReader;

#[derive(Debug, Clone)]
struct ActivityRecord {
    tenant_id: TenantId,
    line_id: String,
    recorded_at: Timestamp,
}

/// Activity records appended by tests or a local seed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductionActivityReader {
    records: Arc<RwLock<Vec<ActivityRecord>>>,
}

impl InMemoryProductionActivityReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one unit of activity on a line.
    pub async fn record(&self, tenant_id: TenantId, line_id: impl Into<String>, at: Timestamp) {
        self.records.write().await.push(ActivityRecord {
            tenant_id,
            line_id: line_id.into(),
            recorded_at: at,
        });
    }
}

#[async_trait]
impl ProductionActivityReader for InMemoryProductionActivityReader {
    async fn count_active_lines(
        &self,
        tenant_id: &TenantId,
        since: Timestamp,
    ) -> Result<u32, DomainError> {
        let records = self.records.read().await;
        let lines: HashSet<&str> = records
            .iter()
            .filter(|r| &r.tenant_id == tenant_id && r.recorded_at >= since)
            .map(|r| r.line_id.as_str())
            .collect();
        Ok(lines.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_distinct_lines_in_window() {
        let reader = InMemoryProductionActivityReader::new();
        let tenant = TenantId::new();
        let now = Timestamp::now();

        reader.record(tenant, "line-a", now).await;
        reader.record(tenant, "line-a", now.minus_days(2)).await;
        reader.record(tenant, "line-b", now.minus_days(5)).await;
        reader.record(tenant, "line-c", now.minus_days(45)).await;
        reader.record(TenantId::new(), "line-d", now).await;

        let count = reader
            .count_active_lines(&tenant, now.minus_days(30))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
