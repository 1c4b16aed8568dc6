//! UsageMeter - active production lines per tenant.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::billing::BillingError;
use crate::domain::foundation::{TenantId, Timestamp};
use crate::ports::ProductionActivityReader;

/// Default trailing window for counting a line as active.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// A tenant's active line count, recomputed per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub tenant_id: TenantId,
    pub active_lines: u32,
    pub window_start: Timestamp,
    pub computed_at: Timestamp,
}

/// Counts lines with activity in the trailing window. Advisory only.
pub struct UsageMeter {
    reader: Arc<dyn ProductionActivityReader>,
    window_days: i64,
}

impl UsageMeter {
    pub fn new(reader: Arc<dyn ProductionActivityReader>, window_days: i64) -> Self {
        Self {
            reader,
            window_days,
        }
    }

    pub async fn active_count(&self, tenant_id: &TenantId) -> Result<u32, BillingError> {
        Ok(self.snapshot(tenant_id).await?.active_lines)
    }

    pub async fn snapshot(&self, tenant_id: &TenantId) -> Result<UsageSnapshot, BillingError> {
        let now = Timestamp::now();
        let window_start = now.minus_days(self.window_days);
        let active_lines = self
            .reader
            .count_active_lines(tenant_id, window_start)
            .await?;

        Ok(UsageSnapshot {
            tenant_id: *tenant_id,
            active_lines,
            window_start,
            computed_at: now,
        })
    }
}
