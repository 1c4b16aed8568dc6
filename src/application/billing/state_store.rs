//! SubscriptionStateStore - the authoritative local subscription record.
//!
//! Every write goes through [`SubscriptionStateStore::update`], which reloads
//! the row, applies a mutation and compare-and-swaps on `version`, retrying
//! on conflict. Mutations must therefore be safe to run more than once.

use std::sync::Arc;

use crate::domain::billing::{BillingError, Subscription};
use crate::domain::foundation::{TenantId, Timestamp};
use crate::ports::{CasOutcome, SaveResult, SubscriptionRepository};

/// Versioned access to per-tenant subscriptions.
pub struct SubscriptionStateStore {
    repository: Arc<dyn SubscriptionRepository>,
    max_cas_retries: u32,
}

impl SubscriptionStateStore {
    pub fn new(repository: Arc<dyn SubscriptionRepository>, max_cas_retries: u32) -> Self {
        Self {
            repository,
            max_cas_retries,
        }
    }

    pub async fn load(&self, tenant_id: &TenantId) -> Result<Option<Subscription>, BillingError> {
        Ok(self.repository.find_by_tenant(tenant_id).await?)
    }

    /// Loads a subscription or fails with `NotFound`.
    pub async fn require(&self, tenant_id: &TenantId) -> Result<Subscription, BillingError> {
        self.load(tenant_id)
            .await?
            .ok_or(BillingError::NotFound(*tenant_id))
    }

    pub async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, BillingError> {
        Ok(self
            .repository
            .find_by_external_id(external_subscription_id)
            .await?)
    }

    /// Creates the initial `none` row for a tenant. Idempotent.
    pub async fn provision(&self, tenant_id: TenantId) -> Result<Subscription, BillingError> {
        let fresh = Subscription::provision(tenant_id, Timestamp::now());
        match self.repository.insert(&fresh).await? {
            SaveResult::Inserted => {
                tracing::info!(tenant_id = %tenant_id, "Provisioned subscription record");
                Ok(fresh)
            }
            SaveResult::AlreadyExists => self.require(&tenant_id).await,
        }
    }

    /// Applies `mutate` to the latest row and writes it back with CAS.
    ///
    /// The closure sees a fresh copy on every attempt. If it leaves the row
    /// unchanged, nothing is written. Errors from the closure abort without
    /// writing. Returns the stored row and the closure's value.
    pub async fn update<T, F>(
        &self,
        tenant_id: &TenantId,
        mut mutate: F,
    ) -> Result<(Subscription, T), BillingError>
    where
        F: FnMut(&mut Subscription) -> Result<T, BillingError> + Send,
        T: Send,
    {
        for attempt in 0..=self.max_cas_retries {
            let current = self.require(tenant_id).await?;
            let mut next = current.clone();
            let value = mutate(&mut next)?;

            if next == current {
                return Ok((current, value));
            }

            match self
                .repository
                .compare_and_swap(&next, current.version)
                .await?
            {
                CasOutcome::Applied { new_version } => {
                    next.version = new_version;
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        version = new_version,
                        status = %next.status,
                        tier = %next.tier,
                        "Subscription written"
                    );
                    return Ok((next, value));
                }
                CasOutcome::VersionMismatch => {
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        expected_version = current.version,
                        attempt,
                        "Subscription version conflict, retrying"
                    );
                }
            }
        }

        tracing::warn!(
            tenant_id = %tenant_id,
            attempts = self.max_cas_retries + 1,
            "Giving up on subscription write after repeated version conflicts"
        );
        Err(BillingError::conflict(format!(
            "subscription for tenant {} kept changing; refetch and retry",
            tenant_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionRepository;
    use crate::domain::billing::SubscriptionStatus;

    fn store(repo: &InMemorySubscriptionRepository, retries: u32) -> SubscriptionStateStore {
        SubscriptionStateStore::new(Arc::new(repo.clone()), retries)
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let repo = InMemorySubscriptionRepository::new();
        let store = store(&repo, 3);
        let tenant = TenantId::new();

        let first = store.provision(tenant).await.unwrap();
        let second = store.provision(tenant).await.unwrap();

        assert_eq!(first.status, SubscriptionStatus::None);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let repo = InMemorySubscriptionRepository::new();
        let store = store(&repo, 3);
        let tenant = TenantId::new();
        store.provision(tenant).await.unwrap();

        let (saved, ()) = store
            .update(&tenant, |s| {
                s.trial_used = true;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(saved.version, 1);
        assert_eq!(repo.get(&tenant).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn unchanged_row_is_not_written() {
        let repo = InMemorySubscriptionRepository::new();
        let store = store(&repo, 3);
        let tenant = TenantId::new();
        store.provision(tenant).await.unwrap();

        let (saved, flag) = store.update(&tenant, |_| Ok(false)).await.unwrap();

        assert!(!flag);
        assert_eq!(saved.version, 0);
    }

    #[tokio::test]
    async fn retries_through_conflicts() {
        let repo = InMemorySubscriptionRepository::new();
        let store = store(&repo, 3);
        let tenant = TenantId::new();
        store.provision(tenant).await.unwrap();
        repo.force_conflicts(2);

        let mut calls = 0;
        let (saved, ()) = store
            .update(&tenant, |s| {
                calls += 1;
                s.trial_used = true;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(calls, 3, "mutation reapplied on each fresh read");
        assert!(saved.trial_used);
    }

    #[tokio::test]
    async fn gives_up_with_conflict() {
        let repo = InMemorySubscriptionRepository::new();
        let store = store(&repo, 1);
        let tenant = TenantId::new();
        store.provision(tenant).await.unwrap();
        repo.force_conflicts(5);

        let err = store
            .update(&tenant, |s| {
                s.trial_used = true;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Conflict(_)));
    }

    #[tokio::test]
    async fn closure_error_aborts_without_write() {
        let repo = InMemorySubscriptionRepository::new();
        let store = store(&repo, 3);
        let tenant = TenantId::new();
        store.provision(tenant).await.unwrap();

        let err = store
            .update(&tenant, |s| -> Result<(), BillingError> {
                s.trial_used = true;
                Err(BillingError::DuplicateTrial(s.tenant_id))
            })
            .await
            .unwrap_err();

        assert_eq!(err, BillingError::DuplicateTrial(tenant));
        assert!(!repo.get(&tenant).await.unwrap().trial_used);
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let repo = InMemorySubscriptionRepository::new();
        let store = store(&repo, 3);
        let tenant = TenantId::new();

        let err = store.update(&tenant, |_| Ok(())).await.unwrap_err();
        assert_eq!(err, BillingError::NotFound(tenant));
    }
}
