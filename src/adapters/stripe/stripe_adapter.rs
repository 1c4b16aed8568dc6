//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` port against the Stripe REST API:
//! checkout sessions, plan replacement, cancellation, the billing portal,
//! billing history and webhook verification.
//!
//! # Security
//!
//! - Webhook bodies are checked with HMAC-SHA256 before parsing
//! - API key and webhook secret are held as `secrecy::SecretString`
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key, webhook_secret, prices)
//!     .with_timeout(Duration::from_secs(10));
//! let adapter = StripePaymentAdapter::new(config)?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::domain::billing::{
    ProviderEvent, ProviderSubscriptionSnapshot, WebhookError, WebhookSignatureVerifier,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    BillingHistory, CheckoutRequest, CheckoutSession, InvoiceSummary, PaymentError,
    PaymentErrorCode, PaymentMethodSummary, PaymentProvider, PortalSession, Proration,
    ReplacePlanRequest, SubscriptionSummary,
};

use super::event_mapping::{
    parse_event, snapshot_from_subscription, INTERVAL_KEY, TENANT_ID_KEY, TIER_KEY,
};
use super::price_table::PriceTable;
use super::webhook_types::{
    StripeCheckoutSession, StripeErrorBody, StripeInvoice, StripeList, StripePaymentMethod,
    StripePortalSession, StripeSubscription,
};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Invoices returned by the billing history view.
const HISTORY_INVOICE_LIMIT: &str = "24";
const HISTORY_LIST_LIMIT: &str = "10";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    api_base_url: String,

    prices: PriceTable,

    timeout: Duration,
}

impl StripeConfig {
    pub fn new(api_key: SecretString, webhook_secret: SecretString, prices: PriceTable) -> Self {
        Self {
            api_key,
            webhook_secret,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            prices,
            timeout: Duration::from_secs(10),
        }
    }

    /// Set a custom API base URL (for testing against a stub server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request network timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Stripe payment provider adapter.
pub struct StripePaymentAdapter {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripePaymentAdapter {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::configuration(format!("http client: {}", e)))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http_client
            .get(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http_client
            .post(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.http_client
            .delete(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
    }

    /// Sends a request and decodes a successful JSON body.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, PaymentError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PaymentError::timeout(format!("{}: {}", operation, e))
            } else {
                PaymentError::network(format!("{}: {}", operation, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = error_from_response(status, &body, operation);
            tracing::warn!(
                operation,
                status = status.as_u16(),
                code = %err.code,
                provider_code = err.provider_code.as_deref().unwrap_or(""),
                "Stripe request failed"
            );
            return Err(err);
        }

        response.json::<T>().await.map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("{}: failed to parse Stripe response: {}", operation, e),
            )
        })
    }

    async fn fetch_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<StripeSubscription>, PaymentError> {
        let path = format!("/v1/subscriptions/{}", external_subscription_id);
        match self.send(self.get(&path), "get_subscription").await {
            Ok(sub) => Ok(Some(sub)),
            Err(e) if e.code == PaymentErrorCode::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn summarize_subscription(&self, sub: StripeSubscription) -> SubscriptionSummary {
        let plan = sub.price_id().and_then(|p| self.config.prices.plan_for(p));
        SubscriptionSummary {
            current_period_end: Timestamp::from_unix_secs(sub.current_period_end),
            cancel_at_period_end: sub.cancel_at_period_end,
            tier: plan.map(|(t, _)| t),
            interval: plan.map(|(_, i)| i),
            id: sub.id,
            status: sub.status,
        }
    }
}

/// Maps a non-2xx Stripe response to a port error.
fn error_from_response(status: StatusCode, body: &str, operation: &str) -> PaymentError {
    let parsed = serde_json::from_str::<StripeErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.error.message.clone())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    let code = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PaymentErrorCode::AuthenticationError,
        StatusCode::NOT_FOUND => PaymentErrorCode::NotFound,
        StatusCode::TOO_MANY_REQUESTS => PaymentErrorCode::RateLimitExceeded,
        StatusCode::BAD_REQUEST | StatusCode::PAYMENT_REQUIRED | StatusCode::CONFLICT => {
            PaymentErrorCode::InvalidRequest
        }
        _ => PaymentErrorCode::ProviderError,
    };

    let err = PaymentError::new(code, format!("{}: {}", operation, message));
    match parsed.and_then(|b| b.error.code.or(b.error.kind)) {
        Some(provider_code) => err.with_provider_code(provider_code),
        None => err,
    }
}

#[async_trait]
impl PaymentProvider for StripePaymentAdapter {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let price_id = self.config.prices.price_for(request.tier, request.interval)?;
        let tenant = request.tenant_id.to_string();

        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", request.success_url),
            ("cancel_url", request.cancel_url),
            ("client_reference_id", tenant.clone()),
            ("metadata[tenant_id]", tenant.clone()),
            ("subscription_data[metadata][tenant_id]", tenant),
            (
                "subscription_data[metadata][tier]",
                request.tier.as_str().to_string(),
            ),
            (
                "subscription_data[metadata][interval]",
                request.interval.as_str().to_string(),
            ),
        ];
        if let Some(customer) = request.customer_id {
            params.push(("customer", customer));
        }

        let session: StripeCheckoutSession = self
            .send(
                self.post("/v1/checkout/sessions").form(&params),
                "create_checkout_session",
            )
            .await?;

        let url = session.url.ok_or_else(|| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                "checkout session returned without a url",
            )
        })?;
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn replace_plan(&self, request: ReplacePlanRequest) -> Result<(), PaymentError> {
        let price_id = self.config.prices.price_for(request.tier, request.interval)?;
        let current = self
            .fetch_subscription(&request.external_subscription_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Subscription"))?;
        let item_id = current.item_id().ok_or_else(|| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                "subscription has no items to replace",
            )
        })?;

        let proration = match request.proration {
            Proration::ProrateNow => "always_invoice",
            Proration::None => "none",
        };
        let params: Vec<(String, String)> = vec![
            ("items[0][id]".to_string(), item_id.to_string()),
            ("items[0][price]".to_string(), price_id.to_string()),
            ("proration_behavior".to_string(), proration.to_string()),
            (
                format!("metadata[{}]", TIER_KEY),
                request.tier.as_str().to_string(),
            ),
            (
                format!("metadata[{}]", INTERVAL_KEY),
                request.interval.as_str().to_string(),
            ),
            (
                format!("metadata[{}]", TENANT_ID_KEY),
                request.tenant_id.to_string(),
            ),
        ];

        let path = format!("/v1/subscriptions/{}", request.external_subscription_id);
        let _: StripeSubscription = self.send(self.post(&path).form(&params), "replace_plan").await?;
        Ok(())
    }

    async fn cancel_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<(), PaymentError> {
        let path = format!("/v1/subscriptions/{}", external_subscription_id);
        match self
            .send::<StripeSubscription>(self.delete(&path), "cancel_subscription")
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.code == PaymentErrorCode::NotFound => {
                tracing::info!(
                    external_subscription_id,
                    "Stripe subscription already gone; treating cancel as done"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<ProviderSubscriptionSnapshot>, PaymentError> {
        let Some(sub) = self.fetch_subscription(external_subscription_id).await? else {
            return Ok(None);
        };
        snapshot_from_subscription(&sub, &self.config.prices)
            .map(Some)
            .map_err(|e| PaymentError::new(PaymentErrorCode::ProviderError, e.to_string()))
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, PaymentError> {
        let params = [("customer", customer_id), ("return_url", return_url)];
        let session: StripePortalSession = self
            .send(
                self.post("/v1/billing_portal/sessions").form(&params),
                "create_portal_session",
            )
            .await?;
        Ok(PortalSession {
            id: session.id,
            url: session.url,
        })
    }

    async fn has_payment_method(&self, customer_id: &str) -> Result<bool, PaymentError> {
        let path = format!("/v1/customers/{}/payment_methods", customer_id);
        let methods: StripeList<StripePaymentMethod> = self
            .send(self.get(&path).query(&[("limit", "1")]), "has_payment_method")
            .await?;
        Ok(!methods.data.is_empty())
    }

    async fn billing_history(&self, customer_id: &str) -> Result<BillingHistory, PaymentError> {
        let methods_path = format!("/v1/customers/{}/payment_methods", customer_id);

        let invoices = self.send::<StripeList<StripeInvoice>>(
            self.get("/v1/invoices")
                .query(&[("customer", customer_id), ("limit", HISTORY_INVOICE_LIMIT)]),
            "list_invoices",
        );
        let subscriptions = self.send::<StripeList<StripeSubscription>>(
            self.get("/v1/subscriptions").query(&[
                ("customer", customer_id),
                ("status", "all"),
                ("limit", HISTORY_LIST_LIMIT),
            ]),
            "list_subscriptions",
        );
        let methods = self.send::<StripeList<StripePaymentMethod>>(
            self.get(&methods_path)
                .query(&[("limit", HISTORY_LIST_LIMIT)]),
            "list_payment_methods",
        );

        let (invoices, subscriptions, methods) =
            tokio::try_join!(invoices, subscriptions, methods)?;

        Ok(BillingHistory {
            invoices: invoices
                .data
                .into_iter()
                .map(|inv| InvoiceSummary {
                    created_at: inv.created.and_then(Timestamp::from_unix_secs),
                    id: inv.id,
                    number: inv.number,
                    status: inv.status,
                    amount_due_cents: inv.amount_due,
                    amount_paid_cents: inv.amount_paid,
                    currency: inv.currency,
                    hosted_invoice_url: inv.hosted_invoice_url,
                    invoice_pdf: inv.invoice_pdf,
                })
                .collect(),
            subscriptions: subscriptions
                .data
                .into_iter()
                .map(|s| self.summarize_subscription(s))
                .collect(),
            payment_methods: methods
                .data
                .into_iter()
                .map(|pm| {
                    let card = pm.card;
                    PaymentMethodSummary {
                        id: pm.id,
                        kind: pm.kind,
                        brand: card.as_ref().and_then(|c| c.brand.clone()),
                        last4: card.as_ref().and_then(|c| c.last4.clone()),
                        exp_month: card.as_ref().and_then(|c| c.exp_month),
                        exp_year: card.as_ref().and_then(|c| c.exp_year),
                    }
                })
                .collect(),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ProviderEvent, WebhookError> {
        WebhookSignatureVerifier::new(self.config.webhook_secret.expose_secret()).verify(
            payload,
            signature,
            Timestamp::now(),
        )?;
        parse_event(payload, &self.config.prices)
    }
}
