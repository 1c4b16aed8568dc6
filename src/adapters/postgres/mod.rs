//! PostgreSQL adapters - sqlx implementations of the storage ports.
//!
//! - `PostgresSubscriptionRepository` - versioned per-tenant subscription rows
//! - `PostgresWebhookEventRepository` - webhook idempotency ledger
//! - `PostgresProductionActivityReader` - active line counts from the tracker

mod production_activity_reader;
mod subscription_repository;
mod webhook_event_repository;

pub use production_activity_reader::PostgresProductionActivityReader;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use webhook_event_repository::PostgresWebhookEventRepository;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
