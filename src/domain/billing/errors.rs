//! Billing error taxonomy.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | Validation | 400 |
//! | Conflict | 409 |
//! | ProviderUnavailable | 503 |
//! | DuplicateTrial | 409 |
//! | SignatureInvalid | 401 |
//! | NotFound | 404 |
//! | Infrastructure | 500 |

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, TenantId, ValidationError};

/// Errors surfaced by billing operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    /// Unknown tier/interval or malformed input. Raised before any provider call.
    #[error("{0}")]
    Validation(ValidationError),

    /// Version mismatch or a state that does not allow the requested change.
    /// The caller must refetch.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payment provider could not be reached or refused the call.
    /// No local state was changed.
    #[error("Payment provider unavailable: {message}")]
    ProviderUnavailable { message: String, retryable: bool },

    /// The tenant has already consumed its trial.
    #[error("Trial already used for tenant {0}")]
    DuplicateTrial(TenantId),

    /// Webhook payload failed signature verification.
    #[error("Webhook signature invalid: {0}")]
    SignatureInvalid(String),

    /// No subscription to change or cancel.
    #[error("No live subscription for tenant {0}")]
    NotFound(TenantId),

    /// Storage or other internal failure.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl BillingError {
    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    pub fn provider_unavailable(message: impl Into<String>, retryable: bool) -> Self {
        BillingError::ProviderUnavailable {
            message: message.into(),
            retryable,
        }
    }

    pub fn signature_invalid(reason: impl Into<String>) -> Self {
        BillingError::SignatureInvalid(reason.into())
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        BillingError::Infrastructure(message.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "VALIDATION_ERROR",
            BillingError::Conflict(_) => "CONFLICT",
            BillingError::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            BillingError::DuplicateTrial(_) => "DUPLICATE_TRIAL",
            BillingError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            BillingError::NotFound(_) => "NOT_FOUND",
            BillingError::Infrastructure(_) => "INFRASTRUCTURE_ERROR",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::ProviderUnavailable { retryable, .. } => *retryable,
            BillingError::Conflict(_) | BillingError::Infrastructure(_) => true,
            _ => false,
        }
    }
}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        BillingError::Validation(err)
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ValidationFailed
            | ErrorCode::EmptyField
            | ErrorCode::OutOfRange
            | ErrorCode::InvalidFormat => BillingError::Validation(
                ValidationError::invalid_format(
                    err.details.get("field").cloned().unwrap_or_default(),
                    err.message,
                ),
            ),
            ErrorCode::VersionConflict
            | ErrorCode::InvalidStateTransition
            | ErrorCode::AlreadyExists => BillingError::Conflict(err.message),
            _ => BillingError::Infrastructure(err.to_string()),
        }
    }
}
