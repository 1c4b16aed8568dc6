//! BillingPortalBroker - hands tenants off to the provider's self-service
//! portal and passes billing history through read-only.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::billing::BillingError;
use crate::domain::foundation::TenantId;
use crate::ports::{BillingHistory, PaymentProvider};

use super::provider_call::call_provider;
use super::state_store::SubscriptionStateStore;

pub struct BillingPortalBroker {
    store: Arc<SubscriptionStateStore>,
    provider: Arc<dyn PaymentProvider>,
    return_url: String,
    provider_timeout: Duration,
}

impl BillingPortalBroker {
    pub fn new(
        store: Arc<SubscriptionStateStore>,
        provider: Arc<dyn PaymentProvider>,
        return_url: impl Into<String>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            return_url: return_url.into(),
            provider_timeout,
        }
    }

    /// Portal session URL. Requires a provider customer, i.e. a completed
    /// checkout at some point.
    pub async fn portal_url(&self, tenant_id: &TenantId) -> Result<String, BillingError> {
        let customer_id = self
            .store
            .load(tenant_id)
            .await?
            .and_then(|s| s.external_customer_id)
            .ok_or(BillingError::NotFound(*tenant_id))?;

        let session = call_provider(
            "create_portal_session",
            self.provider_timeout,
            self.provider
                .create_portal_session(&customer_id, &self.return_url),
        )
        .await?;

        tracing::info!(tenant_id = %tenant_id, portal_session = %session.id, "Portal session created");
        Ok(session.url)
    }

    /// Invoices, subscriptions and payment methods. Empty for tenants that
    /// never reached the provider.
    pub async fn billing_history(
        &self,
        tenant_id: &TenantId,
    ) -> Result<BillingHistory, BillingError> {
        let Some(customer_id) = self
            .store
            .load(tenant_id)
            .await?
            .and_then(|s| s.external_customer_id)
        else {
            return Ok(BillingHistory::default());
        };

        call_provider(
            "billing_history",
            self.provider_timeout,
            self.provider.billing_history(&customer_id),
        )
        .await
    }
}
