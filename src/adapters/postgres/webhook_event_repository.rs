//! PostgreSQL webhook idempotency ledger and staging table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode, ProviderEventId, Timestamp};
use crate::domain::billing::ProviderEvent;
use crate::ports::{SaveResult, StagedWebhook, WebhookEventRecord, WebhookEventRepository};

pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    event_id: String,
    event_type: String,
    received_at: DateTime<Utc>,
    processed_at: DateTime<Utc>,
    payload_digest: String,
}

impl TryFrom<WebhookEventRow> for WebhookEventRecord {
    type Error = DomainError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        Ok(WebhookEventRecord {
            event_id: ProviderEventId::new(row.event_id).map_err(|e| {
                DomainError::new(ErrorCode::DatabaseError, format!("Invalid event_id: {}", e))
            })?,
            event_type: row.event_type,
            received_at: Timestamp::from_datetime(row.received_at),
            processed_at: Timestamp::from_datetime(row.processed_at),
            payload_digest: row.payload_digest,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StagedWebhookRow {
    event: Json<ProviderEvent>,
    received_at: DateTime<Utc>,
    attempts: i32,
    last_error: Option<String>,
    last_attempt_at: DateTime<Utc>,
}

impl From<StagedWebhookRow> for StagedWebhook {
    fn from(row: StagedWebhookRow) -> Self {
        StagedWebhook {
            event: row.event.0,
            received_at: Timestamp::from_datetime(row.received_at),
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            last_error: row.last_error,
            last_attempt_at: Timestamp::from_datetime(row.last_attempt_at),
        }
    }
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn find_by_event_id(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        let row: Option<WebhookEventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, received_at, processed_at, payload_digest
            FROM webhook_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to load webhook event: {}", e)))?;

        row.map(WebhookEventRecord::try_from).transpose()
    }

    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, received_at, processed_at, payload_digest)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(record.event_id.as_str())
        .bind(&record.event_type)
        .bind(record.received_at.as_datetime())
        .bind(record.processed_at.as_datetime())
        .bind(&record.payload_digest)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to record webhook event: {}", e)))?;

        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM webhook_events WHERE processed_at < $1")
            .bind(cutoff.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database(format!("Failed to prune webhook events: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn stage(&self, staged: StagedWebhook) -> Result<SaveResult, DomainError> {
        let attempts = i32::try_from(staged.attempts).unwrap_or(i32::MAX);
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_staged_events
                (event_id, event, received_at, attempts, last_error, last_attempt_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(staged.event.id.as_str())
        .bind(Json(&staged.event))
        .bind(staged.received_at.as_datetime())
        .bind(attempts)
        .bind(&staged.last_error)
        .bind(staged.last_attempt_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to stage webhook event: {}", e)))?;

        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn record_attempt(
        &self,
        event_id: &ProviderEventId,
        error: &str,
        attempted_at: Timestamp,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_staged_events
            SET attempts = attempts + 1, last_error = $2, last_attempt_at = $3
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_str())
        .bind(error)
        .bind(attempted_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to record webhook attempt: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::WebhookEventNotFound,
                format!("No staged event {}", event_id),
            ));
        }
        Ok(())
    }

    async fn find_staged(
        &self,
        attempted_before: Timestamp,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<StagedWebhook>, DomainError> {
        let rows: Vec<StagedWebhookRow> = sqlx::query_as(
            r#"
            SELECT event, received_at, attempts, last_error, last_attempt_at
            FROM webhook_staged_events
            WHERE last_attempt_at < $1 AND attempts < $2
            ORDER BY last_attempt_at
            LIMIT $3
            "#,
        )
        .bind(attempted_before.as_datetime())
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to load staged webhooks: {}", e)))?;

        Ok(rows.into_iter().map(StagedWebhook::from).collect())
    }

    async fn unstage(&self, event_id: &ProviderEventId) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM webhook_staged_events WHERE event_id = $1")
            .bind(event_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database(format!("Failed to unstage webhook event: {}", e)))?;
        Ok(())
    }
}
