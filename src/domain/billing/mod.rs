//! Billing domain - plans, subscriptions and entitlements.
//!
//! # Module Structure
//!
//! - `plan` / `catalog` - Plan tiers and the immutable catalog
//! - `status` - Subscription status state machine
//! - `aggregate` - Subscription aggregate and its transitions
//! - `change` - Plan change classification and intent outcomes
//! - `entitlement` - What a tenant may use right now
//! - `provider_event` - Provider-agnostic webhook model
//! - `webhook_verifier` - HMAC signature checks on webhook bodies
//! - `errors` / `webhook_errors` - Error taxonomy

mod aggregate;
mod catalog;
mod change;
mod entitlement;
mod errors;
mod plan;
mod provider_event;
mod status;
mod webhook_errors;
mod webhook_verifier;

pub use aggregate::{MergeMode, PendingDowngrade, SnapshotMerge, Subscription};
pub use catalog::{CatalogError, PlanCatalog, TierDefinition};
pub use change::{classify, ChangeOutcome, PlanChange};
pub use entitlement::Entitlement;
pub use errors::BillingError;
pub use plan::{
    discounted_yearly_price, BillingInterval, Feature, LineLimit, PlanTier, PlanTierId,
};
pub use provider_event::{
    CheckoutNotice, InvoiceNotice, ProviderEvent, ProviderEventKind, ProviderEventPayload,
    ProviderSubscriptionSnapshot,
};
pub use status::SubscriptionStatus;
pub use webhook_errors::WebhookError;
pub use webhook_verifier::{sign_payload, SignatureHeader, WebhookSignatureVerifier};
