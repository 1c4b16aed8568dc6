//! Provider-agnostic view of payment provider webhooks and subscription state.
//!
//! Adapters translate their wire format into these types; the reconciler
//! never sees provider JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{ProviderEventId, TenantId, Timestamp};

use super::plan::{BillingInterval, PlanTierId};
use super::status::SubscriptionStatus;

/// Event types the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderEventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    InvoicePaymentFailed,
    CheckoutCompleted,
    /// Delivered but not handled. Recorded in the ledger and acknowledged.
    Other(String),
}

impl ProviderEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderEventKind::SubscriptionCreated => "subscription.created",
            ProviderEventKind::SubscriptionUpdated => "subscription.updated",
            ProviderEventKind::SubscriptionDeleted => "subscription.deleted",
            ProviderEventKind::InvoicePaid => "invoice.paid",
            ProviderEventKind::InvoicePaymentFailed => "invoice.payment_failed",
            ProviderEventKind::CheckoutCompleted => "checkout.completed",
            ProviderEventKind::Other(name) => name,
        }
    }
}

impl fmt::Display for ProviderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provider's view of one subscription at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubscriptionSnapshot {
    pub external_subscription_id: String,
    pub external_customer_id: Option<String>,
    /// Tenant stamped into the subscription metadata at checkout.
    pub tenant_id: Option<TenantId>,
    /// Mapped status; `None` for provider states with no local meaning.
    pub status: Option<SubscriptionStatus>,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub cancel_at_period_end: bool,
    pub tier: Option<PlanTierId>,
    pub interval: Option<BillingInterval>,
}

/// Invoice outcome notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceNotice {
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub tenant_id: Option<TenantId>,
}

/// Completed checkout, linking a tenant to a provider customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutNotice {
    pub tenant_id: Option<TenantId>,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
}

/// Event body, already extracted from the provider's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderEventPayload {
    Subscription(ProviderSubscriptionSnapshot),
    Invoice(InvoiceNotice),
    Checkout(CheckoutNotice),
    Empty,
}

/// A verified webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub id: ProviderEventId,
    pub kind: ProviderEventKind,
    pub created_at: Timestamp,
    pub payload: ProviderEventPayload,
    /// Hex SHA-256 of the raw request body.
    pub payload_digest: String,
}

impl ProviderEvent {
    /// Tenant named by the event body, if any.
    pub fn tenant_hint(&self) -> Option<TenantId> {
        match &self.payload {
            ProviderEventPayload::Subscription(s) => s.tenant_id,
            ProviderEventPayload::Invoice(i) => i.tenant_id,
            ProviderEventPayload::Checkout(c) => c.tenant_id,
            ProviderEventPayload::Empty => None,
        }
    }

    /// Provider subscription named by the event body, if any.
    pub fn external_subscription_id(&self) -> Option<&str> {
        match &self.payload {
            ProviderEventPayload::Subscription(s) => Some(s.external_subscription_id.as_str()),
            ProviderEventPayload::Invoice(i) => i.external_subscription_id.as_deref(),
            ProviderEventPayload::Checkout(c) => c.external_subscription_id.as_deref(),
            ProviderEventPayload::Empty => None,
        }
    }
}
