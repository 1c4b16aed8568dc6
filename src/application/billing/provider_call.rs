//! Deadline wrapper for synchronous provider calls.

use std::future::Future;
use std::time::Duration;

use crate::domain::billing::BillingError;
use crate::ports::PaymentError;

/// Awaits a provider call for at most `timeout`.
///
/// A timeout and any provider failure both surface as
/// `BillingError::ProviderUnavailable`; callers must not have written
/// anything locally yet.
pub async fn call_provider<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, BillingError>
where
    F: Future<Output = Result<T, PaymentError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(
                operation,
                code = %e.code,
                retryable = e.retryable,
                error = %e.message,
                "Payment provider call failed"
            );
            Err(e.into())
        }
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Payment provider call timed out"
            );
            Err(BillingError::provider_unavailable(
                format!("{} timed out after {}ms", operation, timeout.as_millis()),
                true,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_success() {
        let value = call_provider("op", Duration::from_secs(1), async { Ok::<_, PaymentError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn timeout_is_retryable_provider_unavailable() {
        let err = call_provider("op", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, PaymentError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BillingError::ProviderUnavailable { retryable: true, .. }));
    }

    #[tokio::test]
    async fn provider_error_keeps_retryable_flag() {
        let err = call_provider("op", Duration::from_secs(1), async {
            Err::<(), _>(PaymentError::authentication("bad key"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BillingError::ProviderUnavailable { retryable: false, .. }));
    }
}
