//! ReconciliationSweep - periodic convergence with the provider.
//!
//! Webhooks can be lost, and a provider call can succeed while the local
//! write after it fails. Each pass:
//! 1. re-applies staged webhook events that were not applied within the
//!    reconciliation window,
//! 2. re-reads provider state for rows still flagged `pending_reconciliation`
//!    after the reconciliation window,
//! 3. re-reads provider-backed rows that have not changed in a long time,
//! 4. applies pending downgrades that have come due,
//! 5. prunes old idempotency ledger rows.
//!
//! Every visited row is marked swept, so rows that keep failing rotate to
//! the back of the next batch.
//!
//! ## Graceful Shutdown
//!
//! The loop listens on a watch channel and finishes the current pass before
//! stopping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::domain::billing::{BillingError, MergeMode, SnapshotMerge, Subscription};
use crate::domain::foundation::Timestamp;
use crate::ports::{PaymentProvider, SubscriptionRepository, SweepQuery, WebhookEventRepository};

use super::provider_call::call_provider;
use super::rollover::RolloverApplier;
use super::state_store::SubscriptionStateStore;
use super::webhook_reconciler::WebhookReconciler;

/// Sweep timing and batch limits.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub interval: Duration,
    /// How long a `pending_reconciliation` row may wait for its webhook.
    pub reconciliation_window: Duration,
    pub resync_after_days: i64,
    pub ledger_retention_days: i64,
    pub batch_size: u32,
    /// Failed attempts after which a staged webhook is no longer retried.
    pub event_retry_limit: u32,
    pub provider_timeout: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            reconciliation_window: Duration::from_secs(900),
            resync_after_days: 35,
            ledger_retention_days: 90,
            batch_size: 100,
            event_retry_limit: 48,
            provider_timeout: Duration::from_secs(10),
        }
    }
}

/// Counts from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub events_retried: usize,
    pub resynced: usize,
    pub rolled_over: usize,
    pub failed: usize,
    pub pruned: u64,
}

pub struct ReconciliationSweep {
    repository: Arc<dyn SubscriptionRepository>,
    store: Arc<SubscriptionStateStore>,
    ledger: Arc<dyn WebhookEventRepository>,
    reconciler: Arc<WebhookReconciler>,
    provider: Arc<dyn PaymentProvider>,
    rollover: Arc<RolloverApplier>,
    settings: SweepSettings,
}

impl ReconciliationSweep {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        store: Arc<SubscriptionStateStore>,
        ledger: Arc<dyn WebhookEventRepository>,
        reconciler: Arc<WebhookReconciler>,
        provider: Arc<dyn PaymentProvider>,
        rollover: Arc<RolloverApplier>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            repository,
            store,
            ledger,
            reconciler,
            provider,
            rollover,
            settings,
        }
    }

    /// Runs passes on the configured interval until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Reconciliation sweep stopping");
                        return;
                    }
                }
                _ = interval.tick() => {
                    self.run_logged(Timestamp::now()).await;
                }
            }
        }
    }

    async fn run_logged(&self, now: Timestamp) {
        match self.run_once(now).await {
            Ok(report) if report != SweepReport::default() => {
                tracing::info!(
                    events_retried = report.events_retried,
                    resynced = report.resynced,
                    rolled_over = report.rolled_over,
                    failed = report.failed,
                    pruned = report.pruned,
                    "Reconciliation sweep finished"
                );
            }
            Ok(_) => tracing::debug!("Reconciliation sweep found nothing to do"),
            Err(e) => tracing::error!(error = %e, "Reconciliation sweep failed"),
        }
    }

    /// One pass at `now`. Per-row failures are counted, not returned.
    pub async fn run_once(&self, now: Timestamp) -> Result<SweepReport, BillingError> {
        let pending_before = now.minus_secs(self.settings.reconciliation_window.as_secs());
        let stale_before = now.minus_days(self.settings.resync_after_days);
        let mut report = SweepReport::default();

        let staged = self
            .reconciler
            .retry_staged(
                pending_before,
                self.settings.event_retry_limit,
                self.settings.batch_size,
            )
            .await?;
        report.events_retried = staged.applied;
        report.failed += staged.failed;

        let rows = self
            .repository
            .find_for_sweep(SweepQuery {
                pending_before,
                stale_before,
                now,
                limit: self.settings.batch_size,
            })
            .await?;

        for row in rows {
            self.visit(&row, now, pending_before, stale_before, &mut report)
                .await;
            if let Err(e) = self.repository.mark_swept(&row.tenant_id, now).await {
                tracing::warn!(tenant_id = %row.tenant_id, error = %e, "Could not mark row swept");
            }
        }

        let cutoff = now.minus_days(self.settings.ledger_retention_days);
        report.pruned = self.ledger.delete_before(cutoff).await?;
        Ok(report)
    }

    async fn visit(
        &self,
        row: &Subscription,
        now: Timestamp,
        pending_before: Timestamp,
        stale_before: Timestamp,
        report: &mut SweepReport,
    ) {
        let needs_resync = row.external_subscription_id.is_some()
            && ((row.pending_reconciliation && row.updated_at < pending_before)
                || (!row.status.is_closed() && row.updated_at < stale_before));

        if needs_resync {
            match self.resync(row, now).await {
                Ok(true) => report.resynced += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(tenant_id = %row.tenant_id, error = %e, "Resync failed");
                    return;
                }
            }
        }

        if row.rollover_due(now) {
            match self.rollover.apply_if_due(&row.tenant_id, now).await {
                Ok(saved) if saved.pending_downgrade.is_none() => report.rolled_over += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(tenant_id = %row.tenant_id, error = %e, "Rollover failed");
                }
            }
        }
    }

    /// Overwrites local state with the provider's current view.
    async fn resync(&self, row: &Subscription, now: Timestamp) -> Result<bool, BillingError> {
        let Some(external_id) = row.external_subscription_id.as_deref() else {
            return Ok(false);
        };
        let snapshot = call_provider(
            "get_subscription",
            self.settings.provider_timeout,
            self.provider.get_subscription(external_id),
        )
        .await?;

        let (_, changed) = match snapshot {
            Some(snapshot) => {
                self.store
                    .update(&row.tenant_id, |s| {
                        let merge = s.merge_provider_snapshot(&snapshot, MergeMode::Authoritative, now);
                        if let SnapshotMerge::Applied = merge {
                            Ok(true)
                        } else {
                            tracing::warn!(
                                tenant_id = %s.tenant_id,
                                outcome = ?merge,
                                "Provider state not merged during resync"
                            );
                            Ok(false)
                        }
                    })
                    .await?
            }
            None => {
                tracing::warn!(
                    tenant_id = %row.tenant_id,
                    external_subscription_id = external_id,
                    "Provider no longer knows the subscription; closing it"
                );
                self.store
                    .update(&row.tenant_id, |s| Ok(s.mark_deleted(external_id, now)))
                    .await?
            }
        };
        Ok(changed)
    }
}
