//! HTTP adapter for billing endpoints.
//!
//! - `POST /billing/create-checkout`
//! - `POST /billing/change-subscription`
//! - `POST /billing/cancel-subscription`
//! - `POST /billing/customer-portal`
//! - `GET /billing/get-billing-history`
//! - `GET /billing/entitlement`
//! - `POST /webhooks/provider`
//! - `GET /health`

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::{BillingApiError, BillingAppState, TenantContext, SIGNATURE_HEADER, TENANT_HEADER};
pub use routes::{billing_router, billing_routes, webhook_routes};
