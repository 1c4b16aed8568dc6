//! HTTP handlers for billing endpoints.
//!
//! Handlers only translate between HTTP and the application services; every
//! business decision is made by the service and comes back as a typed
//! outcome.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Json, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::adapters::worker::{EnqueueError, WebhookQueue};
use crate::application::billing::{
    Acceptance, BillingPortalBroker, ChangeOrchestrator, ChangePlanCommand, EntitlementEvaluator,
    SubscribeCommand, WebhookReconciler,
};
use crate::domain::billing::{BillingError, ChangeOutcome};
use crate::domain::foundation::{TenantId, Timestamp};

use super::dto::{
    parse_plan, CancelResponse, ChangeResponse, ChangeSubscriptionRequest, CheckoutResponse,
    ContactSalesResponse, CreateCheckoutRequest, EntitlementResponse, ErrorResponse,
    HealthResponse, UrlResponse, WebhookAck,
};

/// Header carrying the tenant resolved by the upstream auth layer.
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Header carrying the provider's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for billing routes. Cloned per request.
#[derive(Clone)]
pub struct BillingAppState {
    pub orchestrator: Arc<ChangeOrchestrator>,
    pub entitlements: Arc<EntitlementEvaluator>,
    pub portal: Arc<BillingPortalBroker>,
    pub reconciler: Arc<WebhookReconciler>,
    pub webhook_queue: WebhookQueue,
    /// Where the UI lands after a trial starts.
    pub trial_redirect_url: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Tenant Context
// ════════════════════════════════════════════════════════════════════════════════

/// Tenant the request acts for.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: TenantId,
}

/// Rejection for a missing or malformed tenant header.
pub struct TenantRequired;

impl IntoResponse for TenantRequired {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(
            "TENANT_REQUIRED",
            format!("A valid {} header is required", TENANT_HEADER),
            false,
        );
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = TenantRequired;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<TenantId>().ok())
            .ok_or(TenantRequired)?;
        Ok(TenantContext { tenant_id })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /billing/create-checkout
pub async fn create_checkout(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, BillingApiError> {
    let (tier, interval) = parse_plan(&request.tier, &request.interval)?;
    let outcome = state
        .orchestrator
        .subscribe(SubscribeCommand {
            tenant_id: tenant.tenant_id,
            tier,
            interval,
            start_trial: request.start_trial,
        })
        .await?;

    let response = match outcome {
        ChangeOutcome::CheckoutStarted { url } => CheckoutResponse::Checkout { url },
        ChangeOutcome::TrialStarted { trial_ends_at, .. } => CheckoutResponse::Trial {
            success: true,
            trial: true,
            redirect_url: state.trial_redirect_url.clone(),
            trial_ends_at,
        },
        ChangeOutcome::ContactSales { tier } => {
            CheckoutResponse::ContactSales(ContactSalesResponse::new(tier))
        }
        other => {
            return Err(BillingError::infrastructure(format!(
                "unexpected subscribe outcome {:?}",
                other
            ))
            .into())
        }
    };
    Ok(Json(response))
}

/// POST /billing/change-subscription
pub async fn change_subscription(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
    Json(request): Json<ChangeSubscriptionRequest>,
) -> Result<Json<ChangeResponse>, BillingApiError> {
    let (tier, interval) = parse_plan(&request.new_tier, &request.billing_interval)?;
    let outcome = state
        .orchestrator
        .change_plan(ChangePlanCommand {
            tenant_id: tenant.tenant_id,
            tier,
            interval,
        })
        .await?;
    Ok(Json(ChangeResponse::from_outcome(outcome)?))
}

/// POST /billing/cancel-subscription
pub async fn cancel_subscription(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
) -> Result<Json<CancelResponse>, BillingApiError> {
    match state.orchestrator.cancel(&tenant.tenant_id).await? {
        ChangeOutcome::Canceled { canceled_at } => Ok(Json(CancelResponse {
            success: true,
            canceled_at,
        })),
        other => Err(BillingError::infrastructure(format!(
            "unexpected cancel outcome {:?}",
            other
        ))
        .into()),
    }
}

/// POST /billing/customer-portal
pub async fn customer_portal(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
) -> Result<Json<UrlResponse>, BillingApiError> {
    let url = state.portal.portal_url(&tenant.tenant_id).await?;
    Ok(Json(UrlResponse { url }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /billing/get-billing-history
pub async fn get_billing_history(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, BillingApiError> {
    let history = state.portal.billing_history(&tenant.tenant_id).await?;
    Ok(Json(history))
}

/// GET /billing/entitlement
pub async fn get_entitlement(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
) -> Result<Json<EntitlementResponse>, BillingApiError> {
    let report = state.entitlements.evaluate(&tenant.tenant_id).await?;
    Ok(Json(EntitlementResponse::from(report)))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/provider
///
/// Verifies the signature, stages the event, queues it and acknowledges.
/// Processing happens in the background worker; a staged event the queue
/// cannot take is picked up by the reconciliation sweep. The request only
/// fails when the event could be neither staged nor queued.
pub async fn provider_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, BillingApiError> {
    let received_at = Timestamp::now();
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let event = state.reconciler.verify(&body, signature)?;
    let event_id = event.id.clone();
    let event_type = event.kind.clone();

    let staged = match state.reconciler.accept(&event, received_at).await {
        Ok(Acceptance::Duplicate) => return Ok(Json(WebhookAck { received: true })),
        Ok(Acceptance::Staged) => true,
        Err(e) => {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Could not stage webhook; queueing it directly"
            );
            false
        }
    };

    if let Err(e) = state.webhook_queue.enqueue(event, received_at) {
        if !staged {
            return Err(BillingError::infrastructure(format!(
                "webhook could not be stored: {}",
                e
            ))
            .into());
        }
        let reason = match e {
            EnqueueError::Full => "queue full",
            EnqueueError::Closed => "worker not running",
        };
        tracing::warn!(
            event_id = %event_id,
            event_type = %event_type,
            reason,
            "Webhook staged but not queued; reconciliation sweep will apply it"
        );
        return Ok(Json(WebhookAck { received: true }));
    }

    tracing::debug!(event_id = %event_id, event_type = %event_type, "Webhook queued");
    Ok(Json(WebhookAck { received: true }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct BillingApiError(pub BillingError);

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl BillingApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BillingError::Validation(_) => StatusCode::BAD_REQUEST,
            BillingError::Conflict(_) | BillingError::DuplicateTrial(_) => StatusCode::CONFLICT,
            BillingError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
            BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            BillingError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Billing request failed");
        }
        // Internal details stay in the log.
        let message = match &self.0 {
            BillingError::Infrastructure(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        let body = ErrorResponse::new(self.0.code(), message, self.0.is_retryable());
        (status, Json(body)).into_response()
    }
}
