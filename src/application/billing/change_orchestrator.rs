//! ChangeOrchestrator - user-initiated subscription intents.
//!
//! Handles subscribe (checkout or trial), plan changes and cancellation.
//! Provider calls happen before any local write; a provider failure or
//! timeout leaves local state untouched.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::billing::{
    classify, BillingError, BillingInterval, ChangeOutcome, PlanCatalog, PlanChange, PlanTierId,
    Subscription,
};
use crate::domain::foundation::{TenantId, Timestamp};
use crate::ports::{CheckoutRequest, PaymentProvider, Proration, ReplacePlanRequest};

use super::provider_call::call_provider;
use super::rollover::RolloverApplier;
use super::state_store::SubscriptionStateStore;

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct ChangeSettings {
    pub trial_days: i64,
    pub provider_timeout: Duration,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl Default for ChangeSettings {
    fn default() -> Self {
        Self {
            trial_days: 14,
            provider_timeout: Duration::from_secs(10),
            checkout_success_url: "http://localhost:3000/billing/success".to_string(),
            checkout_cancel_url: "http://localhost:3000/billing/cancel".to_string(),
        }
    }
}

/// Start a subscription, either through checkout or as a local trial.
#[derive(Debug, Clone)]
pub struct SubscribeCommand {
    pub tenant_id: TenantId,
    pub tier: PlanTierId,
    pub interval: BillingInterval,
    pub start_trial: bool,
}

/// Move a live subscription to another plan.
#[derive(Debug, Clone)]
pub struct ChangePlanCommand {
    pub tenant_id: TenantId,
    pub tier: PlanTierId,
    pub interval: BillingInterval,
}

/// Orchestrates subscribe, change plan and cancel.
pub struct ChangeOrchestrator {
    store: Arc<SubscriptionStateStore>,
    provider: Arc<dyn PaymentProvider>,
    catalog: Arc<PlanCatalog>,
    rollover: Arc<RolloverApplier>,
    settings: ChangeSettings,
}

impl ChangeOrchestrator {
    pub fn new(
        store: Arc<SubscriptionStateStore>,
        provider: Arc<dyn PaymentProvider>,
        catalog: Arc<PlanCatalog>,
        rollover: Arc<RolloverApplier>,
        settings: ChangeSettings,
    ) -> Self {
        Self {
            store,
            provider,
            catalog,
            rollover,
            settings,
        }
    }

    /// Starts a trial locally or a provider checkout.
    ///
    /// A checkout leaves local state at its current status; the provider's
    /// webhook activates the subscription.
    pub async fn subscribe(&self, cmd: SubscribeCommand) -> Result<ChangeOutcome, BillingError> {
        if cmd.tier.is_sales_assisted() {
            return Ok(ChangeOutcome::ContactSales { tier: cmd.tier });
        }

        let current = self.store.provision(cmd.tenant_id).await?;
        current.ensure_can_subscribe(Timestamp::now())?;

        if cmd.start_trial {
            return self.start_trial(&cmd).await;
        }

        let session = call_provider(
            "create_checkout_session",
            self.settings.provider_timeout,
            self.provider.create_checkout_session(CheckoutRequest {
                tenant_id: cmd.tenant_id,
                tier: cmd.tier,
                interval: cmd.interval,
                customer_id: current.external_customer_id.clone(),
                success_url: self.settings.checkout_success_url.clone(),
                cancel_url: self.settings.checkout_cancel_url.clone(),
            }),
        )
        .await?;

        tracing::info!(
            tenant_id = %cmd.tenant_id,
            tier = %cmd.tier,
            interval = %cmd.interval,
            checkout_session = %session.id,
            "Checkout started"
        );
        Ok(ChangeOutcome::CheckoutStarted { url: session.url })
    }

    async fn start_trial(&self, cmd: &SubscribeCommand) -> Result<ChangeOutcome, BillingError> {
        let trial_days = self.settings.trial_days;
        let (saved, ()) = self
            .store
            .update(&cmd.tenant_id, |s| {
                s.start_trial(cmd.tier, cmd.interval, trial_days, Timestamp::now())
            })
            .await?;

        let trial_ends_at = saved
            .current_period_end
            .ok_or_else(|| BillingError::infrastructure("trial stored without an end date"))?;
        tracing::info!(
            tenant_id = %cmd.tenant_id,
            tier = %cmd.tier,
            trial_ends_at = %trial_ends_at,
            "Trial started"
        );
        Ok(ChangeOutcome::TrialStarted {
            tier: saved.tier,
            interval: saved.interval,
            trial_ends_at,
        })
    }

    /// Upgrades immediately or schedules a downgrade for period end.
    pub async fn change_plan(&self, cmd: ChangePlanCommand) -> Result<ChangeOutcome, BillingError> {
        let now = Timestamp::now();
        self.store.require(&cmd.tenant_id).await?.ensure_live(now)?;
        let current = self.rollover.apply_if_due(&cmd.tenant_id, now).await?;
        current.ensure_live(now)?;

        let requested = (cmd.tier, cmd.interval);
        match classify(&self.catalog, (current.tier, current.interval), requested) {
            PlanChange::ContactSales => Ok(ChangeOutcome::ContactSales { tier: cmd.tier }),
            PlanChange::Unchanged => Err(BillingError::conflict(format!(
                "tenant is already on {} / {}",
                cmd.tier, cmd.interval
            ))),
            PlanChange::Upgrade => self.upgrade(&cmd, &current).await,
            PlanChange::Downgrade => self.schedule_downgrade(&cmd).await,
        }
    }

    async fn upgrade(
        &self,
        cmd: &ChangePlanCommand,
        current: &Subscription,
    ) -> Result<ChangeOutcome, BillingError> {
        let provider_backed = current.external_subscription_id.is_some();

        if let Some(external_id) = &current.external_subscription_id {
            call_provider(
                "replace_plan",
                self.settings.provider_timeout,
                self.provider.replace_plan(ReplacePlanRequest {
                    tenant_id: cmd.tenant_id,
                    external_subscription_id: external_id.clone(),
                    tier: cmd.tier,
                    interval: cmd.interval,
                    proration: Proration::ProrateNow,
                }),
            )
            .await?;
        }

        let written = self
            .store
            .update(&cmd.tenant_id, |s| {
                s.apply_upgrade(cmd.tier, cmd.interval, provider_backed, Timestamp::now())
            })
            .await;

        match written {
            Ok(_) => {
                tracing::info!(
                    tenant_id = %cmd.tenant_id,
                    from_tier = %current.tier,
                    to_tier = %cmd.tier,
                    interval = %cmd.interval,
                    pending_reconciliation = provider_backed,
                    "Plan upgraded"
                );
                Ok(ChangeOutcome::Upgraded {
                    tier: cmd.tier,
                    interval: cmd.interval,
                    pending_reconciliation: provider_backed,
                })
            }
            Err(e) if provider_backed => {
                tracing::error!(
                    tenant_id = %cmd.tenant_id,
                    to_tier = %cmd.tier,
                    error = %e,
                    "Provider plan replaced but local write failed; pending reconciliation"
                );
                Err(BillingError::infrastructure(format!(
                    "plan changed at provider but not recorded locally ({}); it will be reconciled",
                    e
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn schedule_downgrade(
        &self,
        cmd: &ChangePlanCommand,
    ) -> Result<ChangeOutcome, BillingError> {
        let (saved, scheduled_date) = self
            .store
            .update(&cmd.tenant_id, |s| {
                s.schedule_downgrade(cmd.tier, cmd.interval, Timestamp::now())
            })
            .await?;

        let needs_payment_method = self.needs_payment_method(&saved).await;
        tracing::info!(
            tenant_id = %cmd.tenant_id,
            from_tier = %saved.tier,
            to_tier = %cmd.tier,
            scheduled_date = %scheduled_date,
            needs_payment_method,
            "Downgrade scheduled"
        );
        Ok(ChangeOutcome::DowngradeScheduled {
            tier: cmd.tier,
            interval: cmd.interval,
            scheduled_date,
            needs_payment_method,
        })
    }

    /// A failed lookup counts as missing so the caller prompts for one.
    async fn needs_payment_method(&self, subscription: &Subscription) -> bool {
        let Some(customer_id) = &subscription.external_customer_id else {
            return true;
        };
        match call_provider(
            "has_payment_method",
            self.settings.provider_timeout,
            self.provider.has_payment_method(customer_id),
        )
        .await
        {
            Ok(has_method) => !has_method,
            Err(e) => {
                tracing::warn!(
                    tenant_id = %subscription.tenant_id,
                    error = %e,
                    "Could not check payment method; assuming none"
                );
                true
            }
        }
    }

    /// Cancels at the provider, then locally. Entitlement ends now.
    pub async fn cancel(&self, tenant_id: &TenantId) -> Result<ChangeOutcome, BillingError> {
        let current = self.store.require(tenant_id).await?;
        current.ensure_live(Timestamp::now())?;

        if let Some(external_id) = &current.external_subscription_id {
            call_provider(
                "cancel_subscription",
                self.settings.provider_timeout,
                self.provider.cancel_subscription(external_id),
            )
            .await?;
        }

        let written = self
            .store
            .update(tenant_id, |s| s.cancel_now(Timestamp::now()))
            .await;

        match written {
            Ok((saved, ())) => {
                let canceled_at = saved.canceled_at.unwrap_or(saved.updated_at);
                tracing::info!(
                    tenant_id = %tenant_id,
                    tier = %saved.tier,
                    canceled_at = %canceled_at,
                    "Subscription canceled"
                );
                Ok(ChangeOutcome::Canceled { canceled_at })
            }
            Err(e) if current.external_subscription_id.is_some() => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Provider subscription canceled but local write failed; pending reconciliation"
                );
                Err(BillingError::infrastructure(format!(
                    "canceled at provider but not recorded locally ({}); it will be reconciled",
                    e
                )))
            }
            Err(e) => Err(e),
        }
    }
}
