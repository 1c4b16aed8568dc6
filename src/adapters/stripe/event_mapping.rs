//! Translation of Stripe payloads into provider-agnostic billing events.

use sha2::{Digest, Sha256};

use crate::domain::billing::{
    BillingInterval, CheckoutNotice, InvoiceNotice, PlanTierId, ProviderEvent, ProviderEventKind,
    ProviderEventPayload, ProviderSubscriptionSnapshot, SubscriptionStatus, WebhookError,
};
use crate::domain::foundation::{ProviderEventId, TenantId, Timestamp};

use super::price_table::PriceTable;
use super::webhook_types::{
    StripeCheckoutSession, StripeInvoice, StripeSubscription, StripeWebhookEvent,
};

/// Metadata keys stamped on checkout sessions and subscriptions.
pub const TENANT_ID_KEY: &str = "tenant_id";
pub const TIER_KEY: &str = "tier";
pub const INTERVAL_KEY: &str = "interval";

/// Parses an already-authenticated webhook body.
pub fn parse_event(payload: &[u8], prices: &PriceTable) -> Result<ProviderEvent, WebhookError> {
    let raw: StripeWebhookEvent =
        serde_json::from_slice(payload).map_err(|e| WebhookError::ParseError(e.to_string()))?;

    let id = ProviderEventId::new(raw.id.clone()).map_err(|_| WebhookError::MissingField("id"))?;
    let created_at = Timestamp::from_unix_secs(raw.created)
        .ok_or_else(|| WebhookError::ParseError("created out of range".to_string()))?;

    let (kind, payload_body) = match raw.event_type.as_str() {
        "customer.subscription.created" => (
            ProviderEventKind::SubscriptionCreated,
            ProviderEventPayload::Subscription(subscription_payload(&raw, prices)?),
        ),
        "customer.subscription.updated" => (
            ProviderEventKind::SubscriptionUpdated,
            ProviderEventPayload::Subscription(subscription_payload(&raw, prices)?),
        ),
        "customer.subscription.deleted" => (
            ProviderEventKind::SubscriptionDeleted,
            ProviderEventPayload::Subscription(subscription_payload(&raw, prices)?),
        ),
        "invoice.paid" | "invoice.payment_succeeded" => (
            ProviderEventKind::InvoicePaid,
            ProviderEventPayload::Invoice(invoice_payload(&raw)?),
        ),
        "invoice.payment_failed" => (
            ProviderEventKind::InvoicePaymentFailed,
            ProviderEventPayload::Invoice(invoice_payload(&raw)?),
        ),
        "checkout.session.completed" => (
            ProviderEventKind::CheckoutCompleted,
            ProviderEventPayload::Checkout(checkout_payload(&raw)?),
        ),
        other => (
            ProviderEventKind::Other(other.to_string()),
            ProviderEventPayload::Empty,
        ),
    };

    Ok(ProviderEvent {
        id,
        kind,
        created_at,
        payload: payload_body,
        payload_digest: payload_digest(payload),
    })
}

/// Hex SHA-256 of a raw body.
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Maps a Stripe subscription into a snapshot.
///
/// The plan comes from the item price when it is one of ours, falling back
/// to the metadata written at checkout.
pub fn snapshot_from_subscription(
    sub: &StripeSubscription,
    prices: &PriceTable,
) -> Result<ProviderSubscriptionSnapshot, WebhookError> {
    let plan = sub.price_id().and_then(|price| prices.plan_for(price));
    let tier = plan.map(|(t, _)| t).or_else(|| {
        sub.metadata
            .get(TIER_KEY)
            .and_then(|v| v.parse::<PlanTierId>().ok())
    });
    let interval = plan.map(|(_, i)| i).or_else(|| {
        sub.metadata
            .get(INTERVAL_KEY)
            .and_then(|v| v.parse::<BillingInterval>().ok())
    });

    Ok(ProviderSubscriptionSnapshot {
        external_subscription_id: sub.id.clone(),
        external_customer_id: Some(sub.customer.clone()),
        tenant_id: tenant_from(sub.metadata.get(TENANT_ID_KEY).map(String::as_str)),
        status: SubscriptionStatus::from_provider(&sub.status),
        current_period_start: Timestamp::from_unix_secs(sub.current_period_start)
            .ok_or(WebhookError::MissingField("current_period_start"))?,
        current_period_end: Timestamp::from_unix_secs(sub.current_period_end)
            .ok_or(WebhookError::MissingField("current_period_end"))?,
        cancel_at_period_end: sub.cancel_at_period_end,
        tier,
        interval,
    })
}

fn subscription_payload(
    raw: &StripeWebhookEvent,
    prices: &PriceTable,
) -> Result<ProviderSubscriptionSnapshot, WebhookError> {
    let sub: StripeSubscription = serde_json::from_value(raw.data.object.clone())
        .map_err(|e| WebhookError::ParseError(format!("invalid subscription: {}", e)))?;
    snapshot_from_subscription(&sub, prices)
}

fn invoice_payload(raw: &StripeWebhookEvent) -> Result<InvoiceNotice, WebhookError> {
    let invoice: StripeInvoice = serde_json::from_value(raw.data.object.clone())
        .map_err(|e| WebhookError::ParseError(format!("invalid invoice: {}", e)))?;

    Ok(InvoiceNotice {
        tenant_id: tenant_from(invoice.metadata_value(TENANT_ID_KEY)),
        external_subscription_id: invoice.subscription,
        external_customer_id: invoice.customer,
    })
}

fn checkout_payload(raw: &StripeWebhookEvent) -> Result<CheckoutNotice, WebhookError> {
    let session: StripeCheckoutSession = serde_json::from_value(raw.data.object.clone())
        .map_err(|e| WebhookError::ParseError(format!("invalid checkout session: {}", e)))?;

    let tenant = session
        .metadata
        .get(TENANT_ID_KEY)
        .map(String::as_str)
        .or(session.client_reference_id.as_deref());

    Ok(CheckoutNotice {
        tenant_id: tenant_from(tenant),
        external_customer_id: session.customer,
        external_subscription_id: session.subscription,
    })
}

fn tenant_from(raw: Option<&str>) -> Option<TenantId> {
    raw.and_then(|value| value.parse().ok())
}
