//! In-memory webhook idempotency ledger and staging set.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, ProviderEventId, Timestamp};
use crate::ports::{SaveResult, StagedWebhook, WebhookEventRecord, WebhookEventRepository};

/// Ledger and staged rows keyed by event id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWebhookEventRepository {
    records: Arc<RwLock<HashMap<ProviderEventId, WebhookEventRecord>>>,
    staged: Arc<RwLock<HashMap<ProviderEventId, StagedWebhook>>>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger rows.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn staged_len(&self) -> usize {
        self.staged.read().await.len()
    }

    pub async fn staged(&self, event_id: &str) -> Option<StagedWebhook> {
        let id = ProviderEventId::new(event_id).ok()?;
        self.staged.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn find_by_event_id(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        Ok(self.records.read().await.get(event_id).cloned())
    }

    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        records.insert(record.event_id.clone(), record);
        Ok(SaveResult::Inserted)
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.processed_at >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn stage(&self, staged: StagedWebhook) -> Result<SaveResult, DomainError> {
        let mut rows = self.staged.write().await;
        if rows.contains_key(&staged.event.id) {
            return Ok(SaveResult::AlreadyExists);
        }
        rows.insert(staged.event.id.clone(), staged);
        Ok(SaveResult::Inserted)
    }

    async fn record_attempt(
        &self,
        event_id: &ProviderEventId,
        error: &str,
        attempted_at: Timestamp,
    ) -> Result<(), DomainError> {
        let mut rows = self.staged.write().await;
        let row = rows.get_mut(event_id).ok_or_else(|| {
            DomainError::new(
                ErrorCode::WebhookEventNotFound,
                format!("No staged event {}", event_id),
            )
        })?;
        row.attempts = row.attempts.saturating_add(1);
        row.last_error = Some(error.to_string());
        row.last_attempt_at = attempted_at;
        Ok(())
    }

    async fn find_staged(
        &self,
        attempted_before: Timestamp,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<StagedWebhook>, DomainError> {
        let rows = self.staged.read().await;
        let mut due: Vec<StagedWebhook> = rows
            .values()
            .filter(|s| s.last_attempt_at < attempted_before && s.attempts < max_attempts)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.last_attempt_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn unstage(&self, event_id: &ProviderEventId) -> Result<(), DomainError> {
        self.staged.write().await.remove(event_id);
        Ok(())
    }
}
