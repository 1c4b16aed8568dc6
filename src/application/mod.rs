//! Application layer - services that drive the domain through ports.

pub mod billing;
