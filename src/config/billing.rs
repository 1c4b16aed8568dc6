//! Subscription engine tunables

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,

    /// Trailing window in which a production line counts as active
    #[serde(default = "default_usage_window_days")]
    pub usage_window_days: i64,

    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,

    #[serde(default = "default_webhook_queue_capacity")]
    pub webhook_queue_capacity: usize,

    #[serde(default = "default_webhook_max_attempts")]
    pub webhook_max_attempts: u32,

    /// Sweep retries of a staged webhook before it is left for manual replay
    #[serde(default = "default_webhook_retry_limit")]
    pub webhook_retry_limit: u32,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long a provider-confirmed change may wait for its webhook
    #[serde(default = "default_reconciliation_window")]
    pub reconciliation_window_secs: u64,

    #[serde(default = "default_resync_after_days")]
    pub resync_after_days: i64,

    #[serde(default = "default_ledger_retention_days")]
    pub ledger_retention_days: i64,

    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,

    /// YAML tier definitions replacing the built-in catalog
    pub catalog_path: Option<PathBuf>,
}

impl BillingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn reconciliation_window(&self) -> Duration {
        Duration::from_secs(self.reconciliation_window_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=90).contains(&self.trial_days) {
            return Err(ValidationError::OutOfRange("trial_days"));
        }
        if !(1..=365).contains(&self.usage_window_days) {
            return Err(ValidationError::OutOfRange("usage_window_days"));
        }
        if self.max_cas_retries == 0 {
            return Err(ValidationError::OutOfRange("max_cas_retries"));
        }
        if self.webhook_queue_capacity == 0 {
            return Err(ValidationError::OutOfRange("webhook_queue_capacity"));
        }
        if self.webhook_max_attempts == 0 {
            return Err(ValidationError::OutOfRange("webhook_max_attempts"));
        }
        if self.webhook_retry_limit == 0 {
            return Err(ValidationError::OutOfRange("webhook_retry_limit"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::OutOfRange("sweep_interval_secs"));
        }
        if self.ledger_retention_days < 1 {
            return Err(ValidationError::OutOfRange("ledger_retention_days"));
        }
        if self.sweep_batch_size == 0 {
            return Err(ValidationError::OutOfRange("sweep_batch_size"));
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            trial_days: default_trial_days(),
            usage_window_days: default_usage_window_days(),
            max_cas_retries: default_max_cas_retries(),
            webhook_queue_capacity: default_webhook_queue_capacity(),
            webhook_max_attempts: default_webhook_max_attempts(),
            webhook_retry_limit: default_webhook_retry_limit(),
            sweep_interval_secs: default_sweep_interval(),
            reconciliation_window_secs: default_reconciliation_window(),
            resync_after_days: default_resync_after_days(),
            ledger_retention_days: default_ledger_retention_days(),
            sweep_batch_size: default_sweep_batch_size(),
            catalog_path: None,
        }
    }
}

fn default_trial_days() -> i64 {
    14
}

fn default_usage_window_days() -> i64 {
    30
}

fn default_max_cas_retries() -> u32 {
    5
}

fn default_webhook_queue_capacity() -> usize {
    1024
}

fn default_webhook_max_attempts() -> u32 {
    5
}

fn default_webhook_retry_limit() -> u32 {
    48
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_reconciliation_window() -> u64 {
    900
}

fn default_resync_after_days() -> i64 {
    35
}

fn default_ledger_retention_days() -> i64 {
    90
}

fn default_sweep_batch_size() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.trial_days, 14);
        assert_eq!(config.usage_window_days, 30);
        assert_eq!(config.webhook_queue_capacity, 1024);
        assert_eq!(config.reconciliation_window(), Duration::from_secs(900));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = BillingConfig {
            webhook_queue_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::OutOfRange("webhook_queue_capacity"))
        );
    }

    #[test]
    fn test_trial_days_bounds() {
        let config = BillingConfig {
            trial_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
