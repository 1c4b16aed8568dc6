//! In-memory adapters.
//!
//! Process-local implementations of the storage ports. Used by tests and for
//! running the service without Postgres.

mod production_activity_reader;
mod subscription_repository;
mod webhook_event_repository;

pub use production_activity_reader::InMemoryProductionActivityReader;
pub use subscription_repository::InMemorySubscriptionRepository;
pub use webhook_event_repository::InMemoryWebhookEventRepository;
