//! HTTP DTOs for billing endpoints.
//!
//! Request bodies keep tier and interval as strings so unknown values reach
//! the handler and come back as a 400 with the usual error body, instead of
//! an extractor rejection.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::application::billing::EntitlementReport;
use crate::domain::billing::{
    BillingError, BillingInterval, ChangeOutcome, Feature, PlanTierId, SubscriptionStatus,
};
use crate::domain::foundation::Timestamp;

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Body of `POST /billing/create-checkout`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    pub tier: String,
    pub interval: String,
    #[serde(default)]
    pub start_trial: bool,
}

/// Body of `POST /billing/change-subscription`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSubscriptionRequest {
    pub new_tier: String,
    pub billing_interval: String,
}

/// Parses tier and interval, failing with a validation error.
pub fn parse_plan(tier: &str, interval: &str) -> Result<(PlanTierId, BillingInterval), BillingError> {
    Ok((PlanTierId::from_str(tier)?, BillingInterval::from_str(interval)?))
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Response of `POST /billing/create-checkout`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CheckoutResponse {
    /// Provider checkout to redirect to.
    Checkout { url: String },
    #[serde(rename_all = "camelCase")]
    Trial {
        success: bool,
        trial: bool,
        redirect_url: String,
        trial_ends_at: Timestamp,
    },
    ContactSales(ContactSalesResponse),
}

/// Returned instead of a provider call for sales-assisted tiers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSalesResponse {
    pub success: bool,
    pub contact_sales: bool,
    pub tier: PlanTierId,
    pub message: String,
}

impl ContactSalesResponse {
    pub fn new(tier: PlanTierId) -> Self {
        Self {
            success: false,
            contact_sales: true,
            tier,
            message: format!("The {} plan is arranged with our sales team", tier),
        }
    }
}

/// Kind of plan change reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Upgrade,
    Downgrade,
}

/// Response of `POST /billing/change-subscription`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSubscriptionResponse {
    pub success: bool,
    pub change_type: ChangeType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_payment_method: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub pending_reconciliation: bool,
}

/// Either a plan change or a contact-sales signal.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChangeResponse {
    Changed(ChangeSubscriptionResponse),
    ContactSales(ContactSalesResponse),
}

impl ChangeResponse {
    /// Maps orchestrator outcomes of a plan change.
    pub fn from_outcome(outcome: ChangeOutcome) -> Result<Self, BillingError> {
        match outcome {
            ChangeOutcome::Upgraded {
                tier,
                interval,
                pending_reconciliation,
            } => Ok(ChangeResponse::Changed(ChangeSubscriptionResponse {
                success: true,
                change_type: ChangeType::Upgrade,
                message: format!("Upgraded to {} billed per {}", tier, interval),
                scheduled_date: None,
                needs_payment_method: None,
                pending_reconciliation,
            })),
            ChangeOutcome::DowngradeScheduled {
                tier,
                interval,
                scheduled_date,
                needs_payment_method,
            } => Ok(ChangeResponse::Changed(ChangeSubscriptionResponse {
                success: true,
                change_type: ChangeType::Downgrade,
                message: format!(
                    "Moving to {} billed per {} at the end of the current period",
                    tier, interval
                ),
                scheduled_date: Some(scheduled_date),
                needs_payment_method: Some(needs_payment_method),
                pending_reconciliation: false,
            })),
            ChangeOutcome::ContactSales { tier } => {
                Ok(ChangeResponse::ContactSales(ContactSalesResponse::new(tier)))
            }
            other => Err(BillingError::infrastructure(format!(
                "unexpected plan change outcome {:?}",
                other
            ))),
        }
    }
}

/// Response of `POST /billing/cancel-subscription`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub canceled_at: Timestamp,
}

/// Response carrying a redirect URL.
#[derive(Debug, Clone, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

/// Scheduled downgrade as shown to the tenant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingDowngradeResponse {
    pub tier: PlanTierId,
    pub interval: BillingInterval,
    pub effective_at: Timestamp,
}

/// Response of `GET /billing/entitlement`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementResponse {
    pub subscription_tier: PlanTierId,
    pub billing_interval: BillingInterval,
    pub subscription_status: SubscriptionStatus,
    /// `null` means unlimited.
    pub line_limit: Option<u32>,
    pub active_lines: u32,
    pub at_limit: bool,
    pub features: BTreeSet<Feature>,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub upcoming_downgrade: Option<UpcomingDowngradeResponse>,
}

impl From<EntitlementReport> for EntitlementResponse {
    fn from(report: EntitlementReport) -> Self {
        let e = report.entitlement;
        Self {
            subscription_tier: e.tier,
            billing_interval: e.interval,
            subscription_status: e.status,
            line_limit: e.line_limit.as_option(),
            active_lines: report.active_lines,
            at_limit: report.at_limit,
            features: e.features,
            current_period_end: e.current_period_end,
            cancel_at_period_end: e.cancel_at_period_end,
            upcoming_downgrade: e.upcoming_downgrade.map(|p| UpcomingDowngradeResponse {
                tier: p.tier,
                interval: p.interval,
                effective_at: p.effective_at,
            }),
        }
    }
}

/// Acknowledgement returned to the payment provider.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error body for every billing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, error: impl Into<String>, retryable: bool) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            retryable,
        }
    }
}
