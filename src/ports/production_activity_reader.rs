//! ProductionActivityReader port - read-only view of production data.
//!
//! The production-tracking store is owned elsewhere. Billing only needs to
//! know how many lines recorded activity recently.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, TenantId, Timestamp};

/// Reader for production activity.
#[async_trait]
pub trait ProductionActivityReader: Send + Sync {
    /// Count distinct production lines with at least one activity record at
    /// or after `since`.
    async fn count_active_lines(
        &self,
        tenant_id: &TenantId,
        since: Timestamp,
    ) -> Result<u32, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_activity_reader_is_object_safe() {
        fn _accepts_dyn(_reader: &dyn ProductionActivityReader) {}
    }
}
