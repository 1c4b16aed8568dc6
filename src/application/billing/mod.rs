//! Billing application services.
//!
//! Each service wires domain rules to ports. They are constructed once in
//! `main` and shared behind `Arc`.
//!
//! - `SubscriptionStateStore` - versioned reads and retried CAS writes
//! - `UsageMeter` - active production lines in the trailing window
//! - `EntitlementEvaluator` - limits and feature gates per tenant
//! - `ChangeOrchestrator` - subscribe, change plan, cancel
//! - `WebhookReconciler` - idempotent application of provider events
//! - `BillingPortalBroker` - provider-hosted portal and billing history
//! - `ReconciliationSweep` - periodic convergence with provider state

mod change_orchestrator;
mod entitlement_evaluator;
mod portal_broker;
mod provider_call;
mod reconciliation_sweep;
mod rollover;
mod state_store;
mod usage_meter;
mod webhook_reconciler;

pub use change_orchestrator::{
    ChangeOrchestrator, ChangePlanCommand, ChangeSettings, SubscribeCommand,
};
pub use entitlement_evaluator::{EntitlementEvaluator, EntitlementReport};
pub use portal_broker::BillingPortalBroker;
pub use provider_call::call_provider;
pub use reconciliation_sweep::{ReconciliationSweep, SweepReport, SweepSettings};
pub use rollover::RolloverApplier;
pub use state_store::SubscriptionStateStore;
pub use usage_meter::{UsageMeter, UsageSnapshot};
pub use webhook_reconciler::{Acceptance, ReconcileOutcome, StagedRetry, WebhookReconciler};
