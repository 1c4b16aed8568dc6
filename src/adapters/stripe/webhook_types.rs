//! Stripe wire types.
//!
//! Only the fields we read are declared; everything else in Stripe's payloads
//! is ignored by serde.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ════════════════════════════════════════════════════════════════════════════════
// Event Envelope
// ════════════════════════════════════════════════════════════════════════════════

/// Raw Stripe webhook event.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeWebhookEvent {
    /// Event identifier (evt_...).
    pub id: String,

    /// Event type, e.g. `customer.subscription.updated`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp when the event was created.
    pub created: i64,

    pub data: StripeEventData,

    #[serde(default)]
    pub livemode: bool,
}

/// Event data container.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    /// The object affected by this event.
    pub object: serde_json::Value,
}

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Objects
// ════════════════════════════════════════════════════════════════════════════════

/// Stripe Subscription object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscription {
    /// Subscription identifier (sub_...).
    pub id: String,

    pub customer: String,

    /// Stripe status: trialing, active, past_due, unpaid, canceled,
    /// incomplete, incomplete_expired, paused.
    pub status: String,

    pub current_period_start: i64,

    pub current_period_end: i64,

    #[serde(default)]
    pub cancel_at_period_end: bool,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
}

impl StripeSubscription {
    /// Price of the first subscription item. We only ever sell one.
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    pub fn item_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.id.as_str())
    }
}

/// Stripe list wrapper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

/// Single subscription item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
}

/// Stripe Price object (embedded in subscription items).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePrice {
    pub id: String,
    pub recurring: Option<StripePriceRecurring>,
}

/// Price recurring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePriceRecurring {
    /// day, week, month or year.
    pub interval: String,
}

/// Stripe Invoice object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoice {
    /// Invoice identifier (in_...).
    pub id: String,

    pub customer: Option<String>,

    pub subscription: Option<String>,

    pub number: Option<String>,

    /// draft, open, paid, void or uncollectible.
    pub status: Option<String>,

    #[serde(default)]
    pub amount_due: i64,

    #[serde(default)]
    pub amount_paid: i64,

    #[serde(default)]
    pub currency: String,

    pub created: Option<i64>,

    pub hosted_invoice_url: Option<String>,

    pub invoice_pdf: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Carries the subscription metadata for subscription invoices.
    pub subscription_details: Option<StripeSubscriptionDetails>,
}

impl StripeInvoice {
    /// Metadata value from the invoice or, failing that, its subscription.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str).or_else(|| {
            self.subscription_details
                .as_ref()
                .and_then(|d| d.metadata.get(key))
                .map(String::as_str)
        })
    }
}

/// Subscription details embedded in an invoice.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StripeSubscriptionDetails {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe Checkout Session object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCheckoutSession {
    /// Session identifier (cs_...).
    pub id: String,

    /// Hosted checkout page. Present while the session is open.
    pub url: Option<String>,

    pub customer: Option<String>,

    pub subscription: Option<String>,

    pub client_reference_id: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe billing portal session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePortalSession {
    pub id: String,
    pub url: String,
}

/// Stripe PaymentMethod object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePaymentMethod {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub card: Option<StripeCard>,
}

/// Card details on a payment method.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCard {
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<u32>,
    pub exp_year: Option<u32>,
}

/// Error body returned by the Stripe API.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorBody {
    pub error: StripeApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeApiError {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}
