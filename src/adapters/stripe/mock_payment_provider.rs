//! Mock payment provider for testing.
//!
//! Configurable `PaymentProvider` for unit and integration tests. Supports:
//! - Provider-side subscription state
//! - Error injection, per method or for the next call
//! - Delay injection to exercise timeouts
//! - Call tracking
//! - Webhook verification with a real or permissive signature check

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::billing::{
    ProviderEvent, ProviderSubscriptionSnapshot, SubscriptionStatus, WebhookError,
    WebhookSignatureVerifier,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    BillingHistory, CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider,
    PortalSession, ReplacePlanRequest,
};

use super::event_mapping::parse_event;
use super::price_table::PriceTable;

/// Mock payment provider.
///
/// # Example
///
/// ```ignore
/// let mock = MockPaymentProvider::new();
/// mock.set_method_error("replace_plan", PaymentError::timeout("slow"));
/// let orchestrator = ChangeOrchestrator::new(store, Arc::new(mock.clone()), ...);
/// assert_eq!(mock.call_count("replace_plan"), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockPaymentProvider {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Provider-side subscriptions by external id.
    subscriptions: HashMap<String, ProviderSubscriptionSnapshot>,

    /// Customers with a card on file.
    customers_with_payment_method: HashSet<String>,

    /// Billing history by customer.
    histories: HashMap<String, BillingHistory>,

    /// Error to return on the next call to any method.
    next_error: Option<PaymentError>,

    /// Errors returned by a specific method until cleared.
    method_errors: HashMap<String, PaymentError>,

    /// Sleep before answering a specific method.
    method_delays: HashMap<String, Duration>,

    call_log: Vec<MethodCall>,

    webhook_verify_mode: WebhookVerifyMode,

    checkout_counter: u32,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

#[derive(Default, Clone)]
enum WebhookVerifyMode {
    /// Skip the signature and parse the payload.
    #[default]
    AcceptAll,

    /// Check the signature with this secret.
    RequireSignature(String),

    /// Reject every delivery.
    AlwaysFail,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that verifies webhook signatures with `secret`.
    pub fn with_webhook_secret(secret: impl Into<String>) -> Self {
        let mock = Self::new();
        mock.state().webhook_verify_mode = WebhookVerifyMode::RequireSignature(secret.into());
        mock
    }

    /// A mock that rejects every webhook.
    pub fn rejecting_webhooks() -> Self {
        let mock = Self::new();
        mock.state().webhook_verify_mode = WebhookVerifyMode::AlwaysFail;
        mock
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Stores provider-side state for a subscription.
    pub fn add_subscription(&self, snapshot: ProviderSubscriptionSnapshot) {
        self.state()
            .subscriptions
            .insert(snapshot.external_subscription_id.clone(), snapshot);
    }

    pub fn subscription(&self, external_subscription_id: &str) -> Option<ProviderSubscriptionSnapshot> {
        self.state().subscriptions.get(external_subscription_id).cloned()
    }

    pub fn add_payment_method(&self, customer_id: impl Into<String>) {
        self.state()
            .customers_with_payment_method
            .insert(customer_id.into());
    }

    pub fn set_billing_history(&self, customer_id: impl Into<String>, history: BillingHistory) {
        self.state().histories.insert(customer_id.into(), history);
    }

    /// Fails the next call to any method.
    pub fn set_error(&self, error: PaymentError) {
        self.state().next_error = Some(error);
    }

    /// Fails every call to `method` until cleared.
    pub fn set_method_error(&self, method: &str, error: PaymentError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    /// Delays every call to `method` by `delay`.
    pub fn set_method_delay(&self, method: &str, delay: Duration) {
        self.state().method_delays.insert(method.to_string(), delay);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.next_error = None;
        state.method_errors.clear();
        state.method_delays.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.state().call_log.iter().any(|c| c.method == method)
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().call_log.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the call, applies any delay, then any injected error.
    async fn enter(&self, method: &str, args: Vec<String>) -> Result<(), PaymentError> {
        let delay = {
            let mut state = self.state();
            state.call_log.push(MethodCall {
                method: method.to_string(),
                args,
            });
            state.method_delays.get(method).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }
        if let Some(error) = state.next_error.take() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.enter(
            "create_checkout_session",
            vec![
                request.tenant_id.to_string(),
                request.tier.as_str().to_string(),
                request.interval.as_str().to_string(),
            ],
        )
        .await?;

        let mut state = self.state();
        state.checkout_counter += 1;
        let id = format!("cs_mock_{}", state.checkout_counter);
        Ok(CheckoutSession {
            url: format!("https://checkout.mock.test/c/{}", id),
            id,
        })
    }

    async fn replace_plan(&self, request: ReplacePlanRequest) -> Result<(), PaymentError> {
        self.enter(
            "replace_plan",
            vec![
                request.external_subscription_id.clone(),
                request.tier.as_str().to_string(),
                request.interval.as_str().to_string(),
                format!("{:?}", request.proration),
            ],
        )
        .await?;

        let mut state = self.state();
        if let Some(sub) = state.subscriptions.get_mut(&request.external_subscription_id) {
            sub.tier = Some(request.tier);
            sub.interval = Some(request.interval);
        }
        Ok(())
    }

    async fn cancel_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<(), PaymentError> {
        self.enter(
            "cancel_subscription",
            vec![external_subscription_id.to_string()],
        )
        .await?;

        if let Some(sub) = self.state().subscriptions.get_mut(external_subscription_id) {
            sub.status = Some(SubscriptionStatus::Canceled);
            sub.cancel_at_period_end = false;
        }
        Ok(())
    }

    async fn get_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<ProviderSubscriptionSnapshot>, PaymentError> {
        self.enter("get_subscription", vec![external_subscription_id.to_string()])
            .await?;
        Ok(self.subscription(external_subscription_id))
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, PaymentError> {
        self.enter(
            "create_portal_session",
            vec![customer_id.to_string(), return_url.to_string()],
        )
        .await?;

        let id = format!("bps_mock_{}", customer_id);
        Ok(PortalSession {
            url: format!("https://billing.mock.test/p/{}", id),
            id,
        })
    }

    async fn has_payment_method(&self, customer_id: &str) -> Result<bool, PaymentError> {
        self.enter("has_payment_method", vec![customer_id.to_string()])
            .await?;
        Ok(self
            .state()
            .customers_with_payment_method
            .contains(customer_id))
    }

    async fn billing_history(&self, customer_id: &str) -> Result<BillingHistory, PaymentError> {
        self.enter("billing_history", vec![customer_id.to_string()])
            .await?;
        Ok(self
            .state()
            .histories
            .get(customer_id)
            .cloned()
            .unwrap_or_default())
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ProviderEvent, WebhookError> {
        let mode = self.state().webhook_verify_mode.clone();
        match mode {
            WebhookVerifyMode::AcceptAll => {}
            WebhookVerifyMode::RequireSignature(secret) => {
                WebhookSignatureVerifier::new(&secret).verify(payload, signature, Timestamp::now())?;
            }
            WebhookVerifyMode::AlwaysFail => return Err(WebhookError::InvalidSignature),
        }
        parse_event(payload, &PriceTable::default())
    }
}
