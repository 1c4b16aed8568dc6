//! WebhookReconciler - applies verified provider events to local state.
//!
//! A delivery moves through three steps:
//! 1. `accept` stages the verified event. A delivery whose id is already in
//!    the ledger or already staged stops here.
//! 2. `apply` maps the event onto the subscription through the state store.
//! 3. `complete` writes the ledger row and drops the staged copy.
//!
//! A failed `apply` leaves the event staged with its error recorded, and
//! `retry_staged` picks it up again from the reconciliation sweep.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::billing::{
    BillingError, CheckoutNotice, InvoiceNotice, MergeMode, ProviderEvent, ProviderEventKind,
    ProviderEventPayload, ProviderSubscriptionSnapshot, SnapshotMerge, Subscription,
};
use crate::domain::foundation::{TenantId, Timestamp};
use crate::ports::{
    PaymentProvider, SaveResult, StagedWebhook, WebhookEventRecord, WebhookEventRepository,
};

use super::provider_call::call_provider;
use super::rollover::RolloverApplier;
use super::state_store::SubscriptionStateStore;

/// What happened to a delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local state changed.
    Applied { tenant_id: TenantId },
    /// Event id already in the ledger; nothing done.
    Duplicate,
    /// Event accepted but left state as it was.
    Ignored { reason: String },
}

/// Result of accepting a verified delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// First delivery; the event is staged for processing.
    Staged,
    /// Already applied or already staged.
    Duplicate,
}

/// Counts from one `retry_staged` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagedRetry {
    pub applied: usize,
    pub failed: usize,
}

impl ReconcileOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        ReconcileOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

/// Verifies, deduplicates and applies provider webhooks.
pub struct WebhookReconciler {
    store: Arc<SubscriptionStateStore>,
    ledger: Arc<dyn WebhookEventRepository>,
    provider: Arc<dyn PaymentProvider>,
    rollover: Arc<RolloverApplier>,
    provider_timeout: Duration,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<SubscriptionStateStore>,
        ledger: Arc<dyn WebhookEventRepository>,
        provider: Arc<dyn PaymentProvider>,
        rollover: Arc<RolloverApplier>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            provider,
            rollover,
            provider_timeout,
        }
    }

    /// Checks the signature and decodes the event. Nothing is recorded for a
    /// rejected payload.
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<ProviderEvent, BillingError> {
        self.provider.verify_webhook(payload, signature).map_err(|e| {
            if e.is_authentication_failure() {
                tracing::warn!(
                    reason = %e,
                    payload_bytes = payload.len(),
                    "Rejected webhook: signature verification failed"
                );
            } else {
                tracing::warn!(reason = %e, "Rejected webhook: undecodable payload");
            }
            BillingError::from(e)
        })
    }

    /// Stages a verified event unless its id was seen before.
    pub async fn accept(
        &self,
        event: &ProviderEvent,
        received_at: Timestamp,
    ) -> Result<Acceptance, BillingError> {
        let applied = self.ledger.find_by_event_id(&event.id).await?.is_some();
        if applied {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.kind,
                "Duplicate webhook delivery ignored"
            );
            return Ok(Acceptance::Duplicate);
        }

        match self
            .ledger
            .stage(StagedWebhook::new(event.clone(), received_at))
            .await?
        {
            SaveResult::Inserted => Ok(Acceptance::Staged),
            SaveResult::AlreadyExists => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.kind,
                    "Webhook redelivered while still staged"
                );
                Ok(Acceptance::Duplicate)
            }
        }
    }

    /// Writes the ledger row for an applied event and unstages it.
    pub async fn complete(
        &self,
        event: &ProviderEvent,
        received_at: Timestamp,
    ) -> Result<(), BillingError> {
        let record = WebhookEventRecord::for_event(event, received_at, Timestamp::now());
        self.ledger.save(record).await?;
        self.ledger.unstage(&event.id).await?;
        Ok(())
    }

    /// Keeps a failed event staged with the failure counted against it.
    pub async fn defer(
        &self,
        event: &ProviderEvent,
        received_at: Timestamp,
        error: &BillingError,
    ) -> Result<(), BillingError> {
        self.ledger
            .stage(StagedWebhook::new(event.clone(), received_at))
            .await?;
        self.ledger
            .record_attempt(&event.id, &error.to_string(), Timestamp::now())
            .await?;
        Ok(())
    }

    /// Accepts, applies and completes in one go.
    pub async fn handle(
        &self,
        event: &ProviderEvent,
        received_at: Timestamp,
    ) -> Result<ReconcileOutcome, BillingError> {
        if self.accept(event, received_at).await? == Acceptance::Duplicate {
            return Ok(ReconcileOutcome::Duplicate);
        }
        self.process(event, received_at).await
    }

    /// Re-applies staged events last attempted before `attempted_before`.
    /// Events with `max_attempts` failures are left for an operator.
    pub async fn retry_staged(
        &self,
        attempted_before: Timestamp,
        max_attempts: u32,
        limit: u32,
    ) -> Result<StagedRetry, BillingError> {
        let staged = self
            .ledger
            .find_staged(attempted_before, max_attempts, limit)
            .await?;

        let mut report = StagedRetry::default();
        for row in staged {
            let event = &row.event;
            if self.ledger.find_by_event_id(&event.id).await?.is_some() {
                self.ledger.unstage(&event.id).await?;
                continue;
            }
            match self.process(event, row.received_at).await {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    report.failed += 1;
                    let attempts = row.attempts.saturating_add(1);
                    if attempts >= max_attempts {
                        tracing::error!(
                            event_id = %event.id,
                            event_type = %event.kind,
                            attempts,
                            error = %e,
                            "Staged webhook gave up; left for manual replay"
                        );
                    } else {
                        tracing::warn!(
                            event_id = %event.id,
                            event_type = %event.kind,
                            attempts,
                            error = %e,
                            "Staged webhook retry failed"
                        );
                    }
                }
            }
        }
        Ok(report)
    }

    /// Applies then completes. On failure the event stays staged.
    async fn process(
        &self,
        event: &ProviderEvent,
        received_at: Timestamp,
    ) -> Result<ReconcileOutcome, BillingError> {
        match self.apply(event).await {
            Ok(outcome) => {
                self.complete(event, received_at).await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(defer_err) = self.defer(event, received_at, &e).await {
                    tracing::error!(
                        event_id = %event.id,
                        error = %defer_err,
                        "Could not record failed webhook attempt"
                    );
                }
                Err(e)
            }
        }
    }

    /// Applies a staged event. Safe to call again after a failure.
    pub async fn apply(&self, event: &ProviderEvent) -> Result<ReconcileOutcome, BillingError> {
        let Some(tenant_id) = self.resolve_tenant(event).await? else {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.kind,
                "Webhook names no known tenant"
            );
            return Ok(ReconcileOutcome::ignored("no tenant for event"));
        };

        let now = Timestamp::now();
        let outcome = match (&event.kind, &event.payload) {
            (
                ProviderEventKind::SubscriptionCreated | ProviderEventKind::SubscriptionUpdated,
                ProviderEventPayload::Subscription(snapshot),
            ) => {
                self.merge_snapshot(&tenant_id, snapshot, MergeMode::Event, now)
                    .await?
            }
            (ProviderEventKind::SubscriptionDeleted, ProviderEventPayload::Subscription(snapshot)) => {
                let external_id = snapshot.external_subscription_id.as_str();
                let (_, changed) = self
                    .store
                    .update(&tenant_id, |s| Ok(s.mark_deleted(external_id, now)))
                    .await?;
                changed_or(tenant_id, changed, "subscription already closed or not ours")
            }
            (ProviderEventKind::InvoicePaid, ProviderEventPayload::Invoice(notice)) => {
                let (_, changed) = self
                    .store
                    .update(&tenant_id, |s| {
                        Ok(owns_invoice(s, notice) && s.recover_from_past_due(now))
                    })
                    .await?;
                changed_or(tenant_id, changed, "invoice paid with nothing to recover")
            }
            (ProviderEventKind::InvoicePaymentFailed, ProviderEventPayload::Invoice(notice)) => {
                let (_, changed) = self
                    .store
                    .update(&tenant_id, |s| Ok(owns_invoice(s, notice) && s.mark_past_due(now)))
                    .await?;
                changed_or(tenant_id, changed, "payment failure does not apply")
            }
            (ProviderEventKind::CheckoutCompleted, ProviderEventPayload::Checkout(notice)) => {
                self.complete_checkout(&tenant_id, notice, now).await?
            }
            (ProviderEventKind::Other(name), _) => {
                ReconcileOutcome::ignored(format!("unhandled event type {}", name))
            }
            _ => ReconcileOutcome::ignored("payload does not match event type"),
        };

        match &outcome {
            ReconcileOutcome::Applied { .. } => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.kind,
                    tenant_id = %tenant_id,
                    "Webhook applied"
                );
                if let Err(e) = self.rollover.apply_if_due(&tenant_id, now).await {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        error = %e,
                        "Rollover after webhook failed; sweep will retry"
                    );
                }
            }
            ReconcileOutcome::Ignored { reason } => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.kind,
                    tenant_id = %tenant_id,
                    reason = %reason,
                    "Webhook left state unchanged"
                );
            }
            ReconcileOutcome::Duplicate => {}
        }
        Ok(outcome)
    }

    /// Provider subscription id wins over the tenant named in metadata.
    async fn resolve_tenant(&self, event: &ProviderEvent) -> Result<Option<TenantId>, BillingError> {
        if let Some(external_id) = event.external_subscription_id() {
            if let Some(sub) = self.store.find_by_external_id(external_id).await? {
                return Ok(Some(sub.tenant_id));
            }
        }
        match event.tenant_hint() {
            Some(tenant_id) => Ok(Some(self.store.provision(tenant_id).await?.tenant_id)),
            None => Ok(None),
        }
    }

    async fn merge_snapshot(
        &self,
        tenant_id: &TenantId,
        snapshot: &ProviderSubscriptionSnapshot,
        mode: MergeMode,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, BillingError> {
        let (_, merge) = self
            .store
            .update(tenant_id, |s| Ok(s.merge_provider_snapshot(snapshot, mode, now)))
            .await?;

        Ok(match merge {
            SnapshotMerge::Applied => ReconcileOutcome::Applied {
                tenant_id: *tenant_id,
            },
            SnapshotMerge::Stale => ReconcileOutcome::ignored("older than stored period"),
            SnapshotMerge::ResurrectionBlocked => {
                ReconcileOutcome::ignored("would reopen a closed subscription")
            }
            SnapshotMerge::ForeignSubscription => {
                ReconcileOutcome::ignored("different provider subscription than the live one")
            }
            SnapshotMerge::UnmappedStatus => ReconcileOutcome::ignored("provider status not tracked"),
            SnapshotMerge::Rejected(reason) => {
                tracing::warn!(tenant_id = %tenant_id, reason = %reason, "Provider snapshot rejected");
                ReconcileOutcome::ignored(reason)
            }
        })
    }

    /// Links the customer, then reads the subscription back from the provider
    /// since checkout events carry no status or period.
    async fn complete_checkout(
        &self,
        tenant_id: &TenantId,
        notice: &CheckoutNotice,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, BillingError> {
        let mut linked = false;
        if let Some(customer_id) = notice.external_customer_id.as_deref() {
            let (_, changed) = self
                .store
                .update(tenant_id, |s| Ok(s.link_customer(customer_id, now)))
                .await?;
            linked = changed;
        }

        let Some(external_id) = notice.external_subscription_id.as_deref() else {
            return Ok(changed_or(*tenant_id, linked, "checkout without subscription"));
        };

        let snapshot = call_provider(
            "get_subscription",
            self.provider_timeout,
            self.provider.get_subscription(external_id),
        )
        .await?;

        match snapshot {
            Some(snapshot) => {
                let merged = self
                    .merge_snapshot(tenant_id, &snapshot, MergeMode::Authoritative, now)
                    .await?;
                if linked && !matches!(merged, ReconcileOutcome::Applied { .. }) {
                    return Ok(ReconcileOutcome::Applied {
                        tenant_id: *tenant_id,
                    });
                }
                Ok(merged)
            }
            None => Ok(changed_or(
                *tenant_id,
                linked,
                "checkout subscription unknown to provider",
            )),
        }
    }
}

fn changed_or(tenant_id: TenantId, changed: bool, reason: &str) -> ReconcileOutcome {
    if changed {
        ReconcileOutcome::Applied { tenant_id }
    } else {
        ReconcileOutcome::ignored(reason)
    }
}

/// An invoice for another provider subscription must not touch ours.
fn owns_invoice(sub: &Subscription, notice: &InvoiceNotice) -> bool {
    match (&sub.external_subscription_id, &notice.external_subscription_id) {
        (Some(ours), Some(theirs)) => ours == theirs,
        _ => true,
    }
}
