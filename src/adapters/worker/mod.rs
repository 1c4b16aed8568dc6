//! Background workers.

mod webhook_worker;

pub use webhook_worker::{
    webhook_channel, EnqueueError, QueuedWebhook, RetrySettings, WebhookQueue, WebhookWorker,
};
