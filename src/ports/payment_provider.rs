//! Payment provider port for external payment processing.
//!
//! Defines the contract for payment gateway integrations (e.g., Stripe).
//! The provider owns invoices, taxes and payment methods; we only ask it to
//! start checkouts, change or cancel subscriptions, and report state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::{
    BillingError, BillingInterval, PlanTierId, ProviderEvent, ProviderSubscriptionSnapshot,
    WebhookError,
};
use crate::domain::foundation::{TenantId, Timestamp};

/// Port for payment provider integrations.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a hosted checkout session for a new subscription.
    ///
    /// The tenant id, tier and interval must be carried into the resulting
    /// subscription's metadata so webhooks can be routed back.
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Replace the plan on an existing subscription.
    async fn replace_plan(&self, request: ReplacePlanRequest) -> Result<(), PaymentError>;

    /// Cancel a subscription immediately.
    async fn cancel_subscription(&self, external_subscription_id: &str)
        -> Result<(), PaymentError>;

    /// Read the provider's current view of a subscription.
    async fn get_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<ProviderSubscriptionSnapshot>, PaymentError>;

    /// Create a billing portal session for self-service management.
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, PaymentError>;

    /// Whether the customer has a default payment method on file.
    async fn has_payment_method(&self, customer_id: &str) -> Result<bool, PaymentError>;

    /// Invoices, subscriptions and payment methods as the provider has them.
    async fn billing_history(&self, customer_id: &str) -> Result<BillingHistory, PaymentError>;

    /// Verify a webhook signature and decode the event.
    fn verify_webhook(&self, payload: &[u8], signature: &str)
        -> Result<ProviderEvent, WebhookError>;
}

/// Request to create a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub tenant_id: TenantId,
    pub tier: PlanTierId,
    pub interval: BillingInterval,
    /// Existing provider customer, reused on resubscription.
    pub customer_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// Checkout session for payment completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session ID.
    pub id: String,

    /// URL for the tenant to complete checkout.
    pub url: String,
}

/// How the provider should bill a mid-period plan change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proration {
    /// Charge or credit the difference for the rest of the period now.
    ProrateNow,
    /// Bill the new price from the next period on.
    None,
}

/// Request to move a subscription to another plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacePlanRequest {
    pub tenant_id: TenantId,
    pub external_subscription_id: String,
    pub tier: PlanTierId,
    pub interval: BillingInterval,
    pub proration: Proration,
}

/// Portal session for subscription management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalSession {
    /// Provider's session ID.
    pub id: String,

    /// URL for the tenant to access the portal.
    pub url: String,
}

/// Invoice as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub id: String,
    pub number: Option<String>,
    pub status: Option<String>,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub currency: String,
    pub created_at: Option<Timestamp>,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf: Option<String>,
}

/// Subscription as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub id: String,
    pub status: String,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub tier: Option<PlanTierId>,
    pub interval: Option<BillingInterval>,
}

/// Stored payment method, display fields only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodSummary {
    pub id: String,
    pub kind: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<u32>,
    pub exp_year: Option<u32>,
}

/// Read-only billing history passthrough.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingHistory {
    pub invoices: Vec<InvoiceSummary>,
    pub subscriptions: Vec<SubscriptionSummary>,
    pub payment_methods: Vec<PaymentMethodSummary>,
}

/// Errors from payment provider operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentError {
    /// Error code for categorization.
    pub code: PaymentErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Provider's error code (if available).
    pub provider_code: Option<String>,

    /// Whether the operation can be retried.
    pub retryable: bool,
}

impl PaymentError {
    /// Create a new payment error.
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    /// Create with provider code.
    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::NetworkError, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::Timeout, message)
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::AuthenticationError, message)
    }

    /// Create a not found error.
    pub fn not_found(resource: &str) -> Self {
        Self::new(PaymentErrorCode::NotFound, format!("{} not found", resource))
    }

    /// Create a configuration error (e.g. no price for a tier).
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::Configuration, message)
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for BillingError {
    fn from(err: PaymentError) -> Self {
        BillingError::provider_unavailable(err.to_string(), err.retryable)
    }
}

/// Payment error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorCode {
    /// Network connectivity issue.
    NetworkError,

    /// Provider did not answer within the configured timeout.
    Timeout,

    /// API authentication failed.
    AuthenticationError,

    /// Resource not found.
    NotFound,

    /// Rate limit exceeded.
    RateLimitExceeded,

    /// Request rejected by the provider.
    InvalidRequest,

    /// Local configuration does not cover the request.
    Configuration,

    /// Provider API error.
    ProviderError,
}

impl PaymentErrorCode {
    /// Check if this error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentErrorCode::NetworkError
                | PaymentErrorCode::Timeout
                | PaymentErrorCode::RateLimitExceeded
                | PaymentErrorCode::ProviderError
        )
    }
}

impl std::fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentErrorCode::NetworkError => "network_error",
            PaymentErrorCode::Timeout => "timeout",
            PaymentErrorCode::AuthenticationError => "authentication_error",
            PaymentErrorCode::NotFound => "not_found",
            PaymentErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            PaymentErrorCode::InvalidRequest => "invalid_request",
            PaymentErrorCode::Configuration => "configuration",
            PaymentErrorCode::ProviderError => "provider_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trait object safety test
    #[test]
    fn payment_provider_is_object_safe() {
        fn _accepts_dyn(_provider: &dyn PaymentProvider) {}
    }

    #[test]
    fn payment_error_retryable() {
        assert!(PaymentErrorCode::NetworkError.is_retryable());
        assert!(PaymentErrorCode::Timeout.is_retryable());
        assert!(PaymentErrorCode::RateLimitExceeded.is_retryable());

        assert!(!PaymentErrorCode::InvalidRequest.is_retryable());
        assert!(!PaymentErrorCode::NotFound.is_retryable());
        assert!(!PaymentErrorCode::Configuration.is_retryable());
    }

    #[test]
    fn payment_error_display() {
        let err = PaymentError::timeout("no answer after 10s");
        assert!(err.to_string().contains("timeout"));
        assert!(err.to_string().contains("no answer after 10s"));
    }

    #[test]
    fn payment_error_becomes_provider_unavailable() {
        let err: BillingError = PaymentError::network("connection refused").into();
        assert_eq!(err.code(), "PROVIDER_UNAVAILABLE");
        assert!(err.is_retryable());

        let err: BillingError =
            PaymentError::new(PaymentErrorCode::InvalidRequest, "no such price").into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn billing_history_serializes_camel_case() {
        let json = serde_json::to_value(BillingHistory::default()).unwrap();
        assert!(json.get("paymentMethods").is_some());
    }
}
