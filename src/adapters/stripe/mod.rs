//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` port for Stripe, including:
//! - Checkout sessions for new subscriptions
//! - Plan replacement with or without proration
//! - Immediate cancellation
//! - Billing portal sessions and billing history
//! - Webhook signature verification and event mapping
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - Timestamps are validated to prevent replay attacks (5-minute window)
//! - All secrets are handled via `secrecy::SecretString`

mod event_mapping;
mod mock_payment_provider;
mod price_table;
mod stripe_adapter;
mod webhook_types;

pub use event_mapping::{parse_event, payload_digest};
pub use mock_payment_provider::{MethodCall, MockPaymentProvider};
pub use price_table::PriceTable;
pub use stripe_adapter::{StripeConfig, StripePaymentAdapter};
pub use webhook_types::{StripeInvoice, StripeSubscription, StripeWebhookEvent};
