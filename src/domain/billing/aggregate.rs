//! Subscription aggregate.
//!
//! One Subscription per tenant, created with status `none` when the factory
//! account is provisioned and never deleted.
//!
//! # Invariants
//!
//! - `status` only moves along the edges of [`SubscriptionStatus`]
//! - `pending_downgrade` is set only while status is `active` or `trialing`
//! - `external_subscription_id` is written once per lifecycle; a different id
//!   is only accepted after the previous lifecycle closed (resubscription)
//! - `version` is owned by the repository and bumped on every write

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{StateMachine, TenantId, Timestamp};

use super::errors::BillingError;
use super::plan::{BillingInterval, PlanTierId};
use super::provider_event::ProviderSubscriptionSnapshot;
use super::status::SubscriptionStatus;

/// A tier reduction scheduled for the end of the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDowngrade {
    pub tier: PlanTierId,
    pub interval: BillingInterval,
    pub effective_at: Timestamp,
}

/// How a provider snapshot was merged into local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotMerge {
    /// Local state now reflects the snapshot.
    Applied,
    /// Snapshot period ends before the stored one; out-of-order delivery.
    Stale,
    /// Snapshot would revive a subscription canceled locally.
    ResurrectionBlocked,
    /// Snapshot belongs to another provider subscription while ours is live.
    ForeignSubscription,
    /// Provider status has no local meaning yet (e.g. incomplete payment).
    UnmappedStatus,
    /// Status edge not allowed by the state machine.
    Rejected(String),
}

/// Whether a snapshot comes from an event or from a direct provider read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Webhook delivery: may arrive late or out of order.
    Event,
    /// Fresh read of the provider's current state.
    Authoritative,
}

/// Subscription aggregate: a tenant's plan, status and billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub tenant_id: TenantId,
    pub tier: PlanTierId,
    pub interval: BillingInterval,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<Timestamp>,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub pending_downgrade: Option<PendingDowngrade>,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub trial_used: bool,
    /// Local write made on the strength of a provider call whose final
    /// state (amount, period dates) has not been confirmed by a webhook.
    pub pending_reconciliation: bool,
    pub canceled_at: Option<Timestamp>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates the initial `none` subscription for a newly provisioned tenant.
    pub fn provision(tenant_id: TenantId, now: Timestamp) -> Self {
        Self {
            tenant_id,
            tier: PlanTierId::Starter,
            interval: BillingInterval::Month,
            status: SubscriptionStatus::None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            pending_downgrade: None,
            external_subscription_id: None,
            external_customer_id: None,
            trial_used: false,
            pending_reconciliation: false,
            canceled_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true when a pending downgrade has reached its effective date.
    pub fn rollover_due(&self, now: Timestamp) -> bool {
        self.pending_downgrade
            .map(|p| p.effective_at <= now)
            .unwrap_or(false)
    }

    /// Tier and interval that govern entitlement at `now`.
    ///
    /// A due pending downgrade is treated as applied even before it is
    /// persisted.
    pub fn effective_plan(&self, now: Timestamp) -> (PlanTierId, BillingInterval) {
        match self.pending_downgrade {
            Some(p) if p.effective_at <= now => (p.tier, p.interval),
            _ => (self.tier, self.interval),
        }
    }

    /// A trial whose period has run out without conversion.
    pub fn trial_lapsed(&self, now: Timestamp) -> bool {
        self.status == SubscriptionStatus::Trialing
            && self.current_period_end.map(|end| end <= now).unwrap_or(true)
    }

    /// Live at `now`: active, or trialing with time left. A lapsed trial
    /// keeps its stored status but no longer counts.
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        self.status.is_live() && !self.trial_lapsed(now)
    }

    /// Fails if the tenant already holds a live subscription.
    pub fn ensure_can_subscribe(&self, now: Timestamp) -> Result<(), BillingError> {
        if self.is_live_at(now) {
            return Err(BillingError::conflict(format!(
                "tenant already has a {} subscription",
                self.status
            )));
        }
        Ok(())
    }

    /// Fails with `NotFound` unless the subscription is active or in an
    /// unexpired trial.
    pub fn ensure_live(&self, now: Timestamp) -> Result<(), BillingError> {
        if !self.is_live_at(now) {
            return Err(BillingError::NotFound(self.tenant_id));
        }
        Ok(())
    }

    /// Starts the one-time, locally authoritative trial.
    pub fn start_trial(
        &mut self,
        tier: PlanTierId,
        interval: BillingInterval,
        trial_days: i64,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        self.ensure_can_subscribe(now)?;
        if self.trial_used {
            return Err(BillingError::DuplicateTrial(self.tenant_id));
        }

        self.transition_to(SubscriptionStatus::Trialing)?;
        self.tier = tier;
        self.interval = interval;
        self.current_period_start = Some(now);
        self.current_period_end = Some(now.add_days(trial_days));
        self.trial_used = true;
        self.cancel_at_period_end = false;
        self.pending_downgrade = None;
        self.pending_reconciliation = false;
        self.canceled_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Applies an upgrade immediately and drops any scheduled downgrade.
    ///
    /// `provider_confirmed` is true when the provider changed the plan and a
    /// webhook is still expected to confirm the final amount and dates.
    pub fn apply_upgrade(
        &mut self,
        tier: PlanTierId,
        interval: BillingInterval,
        provider_confirmed: bool,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        self.ensure_live(now)?;
        self.tier = tier;
        self.interval = interval;
        self.pending_downgrade = None;
        self.pending_reconciliation = provider_confirmed;
        self.updated_at = now;
        Ok(())
    }

    /// Schedules a downgrade for the end of the current period and returns
    /// the effective date. Replaces any earlier scheduled downgrade.
    pub fn schedule_downgrade(
        &mut self,
        tier: PlanTierId,
        interval: BillingInterval,
        now: Timestamp,
    ) -> Result<Timestamp, BillingError> {
        self.ensure_live(now)?;
        let effective_at = self.current_period_end.ok_or_else(|| {
            BillingError::conflict("subscription has no billing period to defer a downgrade to")
        })?;

        self.pending_downgrade = Some(PendingDowngrade {
            tier,
            interval,
            effective_at,
        });
        self.updated_at = now;
        Ok(effective_at)
    }

    /// Cancels immediately. Entitlement ends now, not at period end.
    ///
    /// Idempotent once canceled.
    pub fn cancel_now(&mut self, now: Timestamp) -> Result<(), BillingError> {
        if self.status == SubscriptionStatus::Canceled {
            return Ok(());
        }
        self.transition_to(SubscriptionStatus::Canceled)?;
        self.cancel_at_period_end = false;
        self.pending_reconciliation = false;
        self.canceled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Replaces tier/interval with a due pending downgrade.
    ///
    /// Returns false when nothing was due.
    pub fn apply_rollover(&mut self, now: Timestamp) -> bool {
        match self.pending_downgrade {
            Some(p) if p.effective_at <= now => {
                self.tier = p.tier;
                self.interval = p.interval;
                self.pending_downgrade = None;
                self.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Failed invoice. Returns false when the status does not move.
    pub fn mark_past_due(&mut self, now: Timestamp) -> bool {
        if !matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) {
            return false;
        }
        self.set_status(SubscriptionStatus::PastDue, now)
    }

    /// Paid invoice after a failure. Only `past_due` moves back to `active`.
    pub fn recover_from_past_due(&mut self, now: Timestamp) -> bool {
        if self.status != SubscriptionStatus::PastDue {
            return false;
        }
        self.set_status(SubscriptionStatus::Active, now)
    }

    /// Provider deleted the subscription.
    ///
    /// Events for a provider subscription other than ours are ignored, as is
    /// a subscription that is already closed or was never opened.
    pub fn mark_deleted(&mut self, external_subscription_id: &str, now: Timestamp) -> bool {
        if let Some(ours) = &self.external_subscription_id {
            if ours != external_subscription_id {
                return false;
            }
        }
        if self.status.is_closed() || self.status == SubscriptionStatus::None {
            return false;
        }
        if !self.set_status(SubscriptionStatus::Canceled, now) {
            return false;
        }
        self.cancel_at_period_end = false;
        self.pending_reconciliation = false;
        self.canceled_at = Some(now);
        true
    }

    /// Records the provider customer created at checkout.
    pub fn link_customer(&mut self, customer_id: &str, now: Timestamp) -> bool {
        if self.external_customer_id.as_deref() == Some(customer_id) {
            return false;
        }
        self.external_customer_id = Some(customer_id.to_string());
        self.updated_at = now;
        true
    }

    /// Merges the provider's view of the subscription.
    pub fn merge_provider_snapshot(
        &mut self,
        snapshot: &ProviderSubscriptionSnapshot,
        mode: MergeMode,
        now: Timestamp,
    ) -> SnapshotMerge {
        let same_subscription = match &self.external_subscription_id {
            Some(ours) => ours == &snapshot.external_subscription_id,
            None => true,
        };
        let new_lifecycle = !same_subscription
            && (self.status.is_closed() || self.status == SubscriptionStatus::None);

        if !same_subscription && !new_lifecycle {
            return SnapshotMerge::ForeignSubscription;
        }

        let Some(incoming) = snapshot.status else {
            return SnapshotMerge::UnmappedStatus;
        };

        if same_subscription
            && self.status.is_closed()
            && self.external_subscription_id.is_some()
            && incoming != self.status
        {
            return SnapshotMerge::ResurrectionBlocked;
        }

        if mode == MergeMode::Event && same_subscription {
            if let Some(local_end) = self.current_period_end {
                if snapshot.current_period_end < local_end {
                    return SnapshotMerge::Stale;
                }
            }
        }

        if incoming != self.status {
            if let Err(e) = self.status.transition_to(incoming) {
                return SnapshotMerge::Rejected(e.to_string());
            }
        }

        // While an upgrade awaits confirmation, an event still carrying the
        // old plan predates it and must not roll the tier back.
        let plan_matches = snapshot.tier.map(|t| t == self.tier).unwrap_or(true)
            && snapshot.interval.map(|i| i == self.interval).unwrap_or(true);
        let keep_local_plan =
            mode == MergeMode::Event && self.pending_reconciliation && !plan_matches;

        if !keep_local_plan {
            if let Some(tier) = snapshot.tier {
                self.tier = tier;
            }
            if let Some(interval) = snapshot.interval {
                self.interval = interval;
            }
            self.pending_reconciliation = false;
        }

        if new_lifecycle {
            self.canceled_at = None;
            self.pending_downgrade = None;
            self.external_subscription_id = Some(snapshot.external_subscription_id.clone());
        } else if self.external_subscription_id.is_none() {
            self.external_subscription_id = Some(snapshot.external_subscription_id.clone());
        }
        if let Some(customer) = &snapshot.external_customer_id {
            self.external_customer_id = Some(customer.clone());
        }

        self.current_period_start = Some(snapshot.current_period_start);
        self.current_period_end = Some(snapshot.current_period_end);
        self.cancel_at_period_end = snapshot.cancel_at_period_end;
        self.set_status(incoming, now);
        if incoming == SubscriptionStatus::Canceled && self.canceled_at.is_none() {
            self.canceled_at = Some(now);
        }
        self.updated_at = now;
        SnapshotMerge::Applied
    }

    /// Moves along a state machine edge, keeping the pending downgrade
    /// invariant. Returns false when the edge is not allowed.
    fn set_status(&mut self, target: SubscriptionStatus, now: Timestamp) -> bool {
        if self.status != target && !self.status.can_transition_to(&target) {
            return false;
        }
        self.status = target;
        if !target.is_live() {
            self.pending_downgrade = None;
        }
        self.updated_at = now;
        true
    }

    fn transition_to(&mut self, target: SubscriptionStatus) -> Result<(), BillingError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            BillingError::conflict(format!(
                "cannot move subscription from {} to {}",
                self.status, target
            ))
        })?;
        if !target.is_live() {
            self.pending_downgrade = None;
        }
        Ok(())
    }
}
