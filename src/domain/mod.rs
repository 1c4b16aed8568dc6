//! Domain layer containing business logic and domain types.
//!
//! - `foundation` - Shared primitives (ids, timestamps, error codes, state machine)
//! - `billing` - Plan catalog, subscription aggregate and entitlement rules

pub mod billing;
pub mod foundation;
