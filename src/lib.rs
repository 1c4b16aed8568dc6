//! Factory Billing - subscription lifecycle and entitlement engine
//!
//! Owns each tenant's plan, status and billing period for the multi-tenant
//! production tracker, gates line limits and premium features on that
//! state, and keeps it converged with the payment provider through signed
//! webhooks and a periodic reconciliation sweep.

pub mod adapters;
pub mod application;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod ports;
