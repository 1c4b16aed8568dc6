//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Storage Ports
//!
//! - `SubscriptionRepository` - Per-tenant subscription record with CAS writes
//! - `WebhookEventRepository` - Webhook idempotency ledger
//!
//! ## External Systems
//!
//! - `PaymentProvider` - Checkout, plan changes, cancellation, portal, history
//! - `ProductionActivityReader` - Read-only production activity counts

mod payment_provider;
mod production_activity_reader;
mod subscription_repository;
mod webhook_event_repository;

pub use payment_provider::{
    BillingHistory, CheckoutRequest, CheckoutSession, InvoiceSummary, PaymentError,
    PaymentErrorCode, PaymentMethodSummary, PaymentProvider, PortalSession, Proration,
    ReplacePlanRequest, SubscriptionSummary,
};
pub use production_activity_reader::ProductionActivityReader;
pub use subscription_repository::{CasOutcome, SubscriptionRepository, SweepQuery};
pub use webhook_event_repository::{
    SaveResult, StagedWebhook, WebhookEventRecord, WebhookEventRepository,
};
