//! Errors raised while authenticating and decoding provider webhooks.
//!
//! Everything here happens before an event reaches the reconciler, so none of
//! these leave a trace in the idempotency ledger.

use http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::ValidationError;

use super::errors::BillingError;

/// Webhook rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// Signature header absent from the request.
    #[error("Missing signature header")]
    MissingSignature,

    /// Computed HMAC does not match the header.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signed timestamp is older than the replay window.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Signed timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Signature header or body could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Authentic payload lacks a field we need.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

impl WebhookError {
    /// True for failures that mean the request is not authentic.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidSignature
                | WebhookError::TimestampOutOfRange
                | WebhookError::InvalidTimestamp
        )
    }

    /// Maps the error to the status returned to the provider.
    ///
    /// Rejections are 4xx so the provider does not retry them.
    pub fn status_code(&self) -> StatusCode {
        if self.is_authentication_failure() {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::BAD_REQUEST
        }
    }
}

impl From<WebhookError> for BillingError {
    fn from(err: WebhookError) -> Self {
        if err.is_authentication_failure() {
            BillingError::signature_invalid(err.to_string())
        } else {
            BillingError::Validation(ValidationError::invalid_format("payload", err.to_string()))
        }
    }
}
