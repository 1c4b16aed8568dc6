//! Adapters - Implementations of port interfaces.
//!
//! - `memory` - in-process storage for tests and local runs
//! - `postgres` - sqlx-backed storage
//! - `stripe` - payment provider client and mock
//! - `http` - axum routes
//! - `worker` - background webhook consumer

pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;
pub mod worker;
