//! WebhookEventRepository port - idempotency ledger plus staged events.
//!
//! The provider delivers at least once and may reorder. A ledger row per
//! event id makes every delivery after the first a no-op. Ledger rows are
//! written once the event has been applied and are never updated.
//!
//! Verified events wait in the staging set until they are applied. A staged
//! row also blocks concurrent redeliveries, and a row whose attempts keep
//! failing stays staged for the reconciliation sweep to retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::ProviderEvent;
use crate::domain::foundation::{DomainError, ProviderEventId, Timestamp};

/// Ledger row for an applied webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub event_id: ProviderEventId,
    pub event_type: String,
    /// When the HTTP request was accepted.
    pub received_at: Timestamp,
    /// When the event was applied.
    pub processed_at: Timestamp,
    /// Hex SHA-256 of the raw body.
    pub payload_digest: String,
}

impl WebhookEventRecord {
    /// Builds the row for an event applied at `processed_at`.
    pub fn for_event(event: &ProviderEvent, received_at: Timestamp, processed_at: Timestamp) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.kind.as_str().to_string(),
            received_at,
            processed_at,
            payload_digest: event.payload_digest.clone(),
        }
    }
}

/// A verified event that has not been applied yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedWebhook {
    pub event: ProviderEvent,
    pub received_at: Timestamp,
    /// Failed apply attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Last time the event was handed to a processor. Starts at `received_at`.
    pub last_attempt_at: Timestamp,
}

impl StagedWebhook {
    pub fn new(event: ProviderEvent, received_at: Timestamp) -> Self {
        Self {
            event,
            received_at,
            attempts: 0,
            last_error: None,
            last_attempt_at: received_at,
        }
    }
}

/// Result of attempting to insert a row keyed by a unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Record was inserted (first time seeing this id).
    Inserted,
    /// Record already exists. Nothing was written.
    AlreadyExists,
}

/// Port for the webhook idempotency ledger and its staging set.
///
/// Implementations should use a unique constraint on `event_id` in both
/// tables so that concurrent deliveries cannot both insert the same event.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Find a ledger row by event id.
    async fn find_by_event_id(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<WebhookEventRecord>, DomainError>;

    /// Insert a ledger row with `ON CONFLICT DO NOTHING` semantics.
    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError>;

    /// Delete ledger rows processed before `cutoff`. Returns the number removed.
    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;

    /// Stage a verified event with `ON CONFLICT DO NOTHING` semantics.
    async fn stage(&self, staged: StagedWebhook) -> Result<SaveResult, DomainError>;

    /// Count a failed attempt against a staged event.
    async fn record_attempt(
        &self,
        event_id: &ProviderEventId,
        error: &str,
        attempted_at: Timestamp,
    ) -> Result<(), DomainError>;

    /// Staged events last attempted before `attempted_before` with fewer than
    /// `max_attempts` failures, least recently attempted first.
    async fn find_staged(
        &self,
        attempted_before: Timestamp,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<StagedWebhook>, DomainError>;

    /// Drop a staged event. Missing rows are not an error.
    async fn unstage(&self, event_id: &ProviderEventId) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{ProviderEventKind, ProviderEventPayload};

    fn event() -> ProviderEvent {
        ProviderEvent {
            id: ProviderEventId::new("evt_42").unwrap(),
            kind: ProviderEventKind::InvoicePaid,
            created_at: Timestamp::now(),
            payload: ProviderEventPayload::Empty,
            payload_digest: "ab12".to_string(),
        }
    }

    #[test]
    fn webhook_event_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn WebhookEventRepository) {}
    }

    #[test]
    fn record_copies_identity_and_digest_from_event() {
        let received = Timestamp::now();
        let record = WebhookEventRecord::for_event(&event(), received, received);

        assert_eq!(record.event_id.as_str(), "evt_42");
        assert_eq!(record.event_type, "invoice.paid");
        assert_eq!(record.payload_digest, "ab12");
    }

    #[test]
    fn staged_event_starts_unattempted() {
        let received = Timestamp::now();
        let staged = StagedWebhook::new(event(), received);

        assert_eq!(staged.attempts, 0);
        assert_eq!(staged.last_error, None);
        assert_eq!(staged.last_attempt_at, received);
    }
}
