//! Axum router configuration for billing endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    cancel_subscription, change_subscription, create_checkout, customer_portal,
    get_billing_history, get_entitlement, health, provider_webhook, BillingAppState,
};

/// Tenant-facing billing routes, mounted at `/billing`.
///
/// # Routes
/// - `POST /create-checkout` - start a trial or a provider checkout
/// - `POST /change-subscription` - upgrade now or schedule a downgrade
/// - `POST /cancel-subscription` - cancel immediately
/// - `POST /customer-portal` - provider self-service portal URL
/// - `GET /get-billing-history` - invoices, subscriptions, payment methods
/// - `GET /entitlement` - current limits and features
pub fn billing_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/create-checkout", post(create_checkout))
        .route("/change-subscription", post(change_subscription))
        .route("/cancel-subscription", post(cancel_subscription))
        .route("/customer-portal", post(customer_portal))
        .route("/get-billing-history", get(get_billing_history))
        .route("/entitlement", get(get_entitlement))
}

/// Provider webhook routes, mounted at `/webhooks`.
///
/// Not tenant scoped; authenticity comes from the signature.
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/provider", post(provider_webhook))
}

/// Complete service router. Every request gets an `x-request-id`, echoed
/// back on the response, before tracing picks it up.
pub fn billing_router(state: BillingAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/billing", billing_routes())
        .nest("/webhooks", webhook_routes())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
