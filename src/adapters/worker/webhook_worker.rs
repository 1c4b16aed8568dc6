//! Background webhook processing.
//!
//! The HTTP route verifies, stages and enqueues; this worker drains the
//! bounded queue through the reconciler. `apply` is retried with exponential
//! backoff while the error is retryable. An event that still fails stays
//! staged with its error, and the reconciliation sweep retries it later.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::application::billing::{ReconcileOutcome, WebhookReconciler};
use crate::domain::billing::{BillingError, ProviderEvent};
use crate::domain::foundation::Timestamp;

/// Retry policy for a single event.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetrySettings {
    /// Delay before attempt `attempt + 1`, doubling from `base_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A verified event waiting for the worker.
#[derive(Debug, Clone)]
pub struct QueuedWebhook {
    pub event: ProviderEvent,
    pub received_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("webhook queue is full")]
    Full,
    #[error("webhook worker is not running")]
    Closed,
}

/// Sending half handed to the HTTP layer.
#[derive(Debug, Clone)]
pub struct WebhookQueue {
    tx: mpsc::Sender<QueuedWebhook>,
}

impl WebhookQueue {
    /// Enqueues without waiting.
    pub fn enqueue(&self, event: ProviderEvent, received_at: Timestamp) -> Result<(), EnqueueError> {
        self.tx
            .try_send(QueuedWebhook { event, received_at })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            })
    }
}

/// Drains the queue through the reconciler.
pub struct WebhookWorker {
    reconciler: Arc<WebhookReconciler>,
    rx: mpsc::Receiver<QueuedWebhook>,
    retry: RetrySettings,
}

/// Creates the queue and its worker.
pub fn webhook_channel(
    capacity: usize,
    reconciler: Arc<WebhookReconciler>,
    retry: RetrySettings,
) -> (WebhookQueue, WebhookWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        WebhookQueue { tx },
        WebhookWorker {
            reconciler,
            rx,
            retry,
        },
    )
}

impl WebhookWorker {
    /// Processes events until shutdown, then drains what is already queued.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                item = self.rx.recv() => match item {
                    Some(item) => self.process(item).await,
                    None => return,
                },
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Some(item) = self.rx.recv().await {
            self.process(item).await;
            drained += 1;
        }
        tracing::info!(drained, "Webhook worker stopped");
    }

    /// Applies then completes one staged event. After `max_attempts` the
    /// failure is recorded on the staged row.
    pub async fn process(&self, item: QueuedWebhook) {
        let event = &item.event;

        match self
            .with_retry(event, "apply", || self.reconciler.apply(event))
            .await
        {
            Ok(outcome) => {
                let completed = self
                    .with_retry(event, "complete", || {
                        self.reconciler.complete(event, item.received_at)
                    })
                    .await;
                match (completed, outcome) {
                    (Err(e), _) => tracing::error!(
                        event_id = %event.id,
                        error = %e,
                        "Webhook applied but not recorded; sweep will apply it again"
                    ),
                    (Ok(()), ReconcileOutcome::Applied { tenant_id }) => {
                        tracing::debug!(event_id = %event.id, tenant_id = %tenant_id, "Webhook processed")
                    }
                    (Ok(()), _) => {}
                }
            }
            Err(e) => match self.reconciler.defer(event, item.received_at, &e).await {
                Ok(()) => tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.kind,
                    error = %e,
                    "Webhook left staged; reconciliation sweep will retry"
                ),
                Err(defer_err) => tracing::error!(
                    event_id = %event.id,
                    event_type = %event.kind,
                    error = %e,
                    defer_error = %defer_err,
                    "Webhook failed and could not be staged for retry"
                ),
            },
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        event: &ProviderEvent,
        step: &'static str,
        mut op: F,
    ) -> Result<T, BillingError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, BillingError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        event_id = %event.id,
                        event_type = %event.kind,
                        step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Webhook step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
