//! Service assembly.
//!
//! Builds every billing service once from storage and provider handles and
//! returns the HTTP state plus the two background tasks. `main` feeds it
//! Postgres and Stripe; tests feed it the in-memory adapters and the mock
//! provider.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::http::BillingAppState;
use crate::adapters::worker::{webhook_channel, RetrySettings, WebhookWorker};
use crate::application::billing::{
    BillingPortalBroker, ChangeOrchestrator, ChangeSettings, EntitlementEvaluator,
    ReconciliationSweep, RolloverApplier, SubscriptionStateStore, SweepSettings, UsageMeter,
    WebhookReconciler,
};
use crate::config::AppConfig;
use crate::domain::billing::PlanCatalog;
use crate::ports::{
    PaymentProvider, ProductionActivityReader, SubscriptionRepository, WebhookEventRepository,
};

/// Port implementations the services run on.
#[derive(Clone)]
pub struct BillingComponents {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub ledger: Arc<dyn WebhookEventRepository>,
    pub activity: Arc<dyn ProductionActivityReader>,
    pub provider: Arc<dyn PaymentProvider>,
    pub catalog: Arc<PlanCatalog>,
}

/// Tunables gathered from configuration.
#[derive(Debug, Clone)]
pub struct BillingOptions {
    pub max_cas_retries: u32,
    pub usage_window_days: i64,
    pub provider_timeout: Duration,
    pub change: ChangeSettings,
    pub sweep: SweepSettings,
    pub retry: RetrySettings,
    pub webhook_queue_capacity: usize,
    pub portal_return_url: String,
    pub trial_redirect_url: String,
}

impl Default for BillingOptions {
    fn default() -> Self {
        Self {
            max_cas_retries: 5,
            usage_window_days: 30,
            provider_timeout: Duration::from_secs(10),
            change: ChangeSettings::default(),
            sweep: SweepSettings::default(),
            retry: RetrySettings::default(),
            webhook_queue_capacity: 1024,
            portal_return_url: "http://localhost:3000/billing".to_string(),
            trial_redirect_url: "/dashboard".to_string(),
        }
    }
}

impl BillingOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let billing = &config.billing;
        let payment = &config.payment;
        let provider_timeout = payment.provider_timeout();
        Self {
            max_cas_retries: billing.max_cas_retries,
            usage_window_days: billing.usage_window_days,
            provider_timeout,
            change: ChangeSettings {
                trial_days: billing.trial_days,
                provider_timeout,
                checkout_success_url: payment.checkout_success_url.clone(),
                checkout_cancel_url: payment.checkout_cancel_url.clone(),
            },
            sweep: SweepSettings {
                interval: billing.sweep_interval(),
                reconciliation_window: billing.reconciliation_window(),
                resync_after_days: billing.resync_after_days,
                ledger_retention_days: billing.ledger_retention_days,
                batch_size: billing.sweep_batch_size,
                event_retry_limit: billing.webhook_retry_limit,
                provider_timeout,
            },
            retry: RetrySettings {
                max_attempts: billing.webhook_max_attempts,
                ..RetrySettings::default()
            },
            webhook_queue_capacity: billing.webhook_queue_capacity,
            portal_return_url: payment.portal_return_url.clone(),
            trial_redirect_url: payment.trial_redirect_url.clone(),
        }
    }
}

/// Everything `main` needs to serve and run background work.
pub struct BillingRuntime {
    pub state: BillingAppState,
    pub worker: WebhookWorker,
    pub sweep: ReconciliationSweep,
}

pub fn assemble(components: BillingComponents, options: BillingOptions) -> BillingRuntime {
    let BillingComponents {
        subscriptions,
        ledger,
        activity,
        provider,
        catalog,
    } = components;

    let store = Arc::new(SubscriptionStateStore::new(
        subscriptions.clone(),
        options.max_cas_retries,
    ));
    let usage = Arc::new(UsageMeter::new(activity, options.usage_window_days));
    let rollover = Arc::new(RolloverApplier::new(
        store.clone(),
        provider.clone(),
        options.provider_timeout,
    ));

    let entitlements = Arc::new(EntitlementEvaluator::new(
        store.clone(),
        catalog.clone(),
        usage,
    ));
    let orchestrator = Arc::new(ChangeOrchestrator::new(
        store.clone(),
        provider.clone(),
        catalog,
        rollover.clone(),
        options.change,
    ));
    let portal = Arc::new(BillingPortalBroker::new(
        store.clone(),
        provider.clone(),
        options.portal_return_url,
        options.provider_timeout,
    ));
    let reconciler = Arc::new(WebhookReconciler::new(
        store.clone(),
        ledger.clone(),
        provider.clone(),
        rollover.clone(),
        options.provider_timeout,
    ));
    let sweep = ReconciliationSweep::new(
        subscriptions,
        store,
        ledger,
        reconciler.clone(),
        provider,
        rollover,
        options.sweep,
    );

    let (webhook_queue, worker) = webhook_channel(
        options.webhook_queue_capacity,
        reconciler.clone(),
        options.retry,
    );

    BillingRuntime {
        state: BillingAppState {
            orchestrator,
            entitlements,
            portal,
            reconciler,
            webhook_queue,
            trial_redirect_url: options.trial_redirect_url,
        },
        worker,
        sweep,
    }
}
