//! In-memory subscription repository with version-checked writes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::billing::Subscription;
use crate::domain::foundation::{DomainError, TenantId, Timestamp};
use crate::ports::{CasOutcome, SaveResult, SubscriptionRepository, SweepQuery};

/// Subscription rows keyed by tenant.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionRepository {
    rows: Arc<RwLock<HashMap<TenantId, Subscription>>>,
    forced_conflicts: Arc<AtomicUsize>,
    forced_failures: Arc<AtomicUsize>,
    swept: Arc<RwLock<HashMap<TenantId, Timestamp>>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a row as-is, bypassing version checks. For test setup.
    pub async fn put(&self, subscription: Subscription) {
        self.rows
            .write()
            .await
            .insert(subscription.tenant_id, subscription);
    }

    /// Returns a copy of a row.
    pub async fn get(&self, tenant_id: &TenantId) -> Option<Subscription> {
        self.rows.read().await.get(tenant_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Makes the next `n` compare-and-swap calls report a version mismatch,
    /// as if another writer got there first.
    pub fn force_conflicts(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` compare-and-swap calls fail with a database error.
    pub fn force_failures(&self, n: usize) {
        self.forced_failures.store(n, Ordering::SeqCst);
    }

    fn take_forced(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<SaveResult, DomainError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&subscription.tenant_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        rows.insert(subscription.tenant_id, subscription.clone());
        Ok(SaveResult::Inserted)
    }

    async fn find_by_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self.rows.read().await.get(tenant_id).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|s| s.external_subscription_id.as_deref() == Some(external_subscription_id))
            .cloned())
    }

    async fn compare_and_swap(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<CasOutcome, DomainError> {
        if Self::take_forced(&self.forced_failures) {
            return Err(DomainError::database("simulated write failure"));
        }

        let mut rows = self.rows.write().await;
        let Some(stored) = rows.get_mut(&subscription.tenant_id) else {
            return Ok(CasOutcome::VersionMismatch);
        };

        if Self::take_forced(&self.forced_conflicts) {
            stored.version += 1;
            return Ok(CasOutcome::VersionMismatch);
        }
        if stored.version != expected_version {
            return Ok(CasOutcome::VersionMismatch);
        }

        let new_version = expected_version + 1;
        let mut next = subscription.clone();
        next.version = new_version;
        *stored = next;
        Ok(CasOutcome::Applied { new_version })
    }

    async fn find_for_sweep(&self, query: SweepQuery) -> Result<Vec<Subscription>, DomainError> {
        let rows = self.rows.read().await;
        let swept = self.swept.read().await;
        let mut matched: Vec<Subscription> =
            rows.values().filter(|s| query.matches(s)).cloned().collect();
        matched.sort_by_key(|s| (swept.get(&s.tenant_id).copied(), s.updated_at));
        matched.truncate(query.limit as usize);
        Ok(matched)
    }

    async fn mark_swept(&self, tenant_id: &TenantId, at: Timestamp) -> Result<(), DomainError> {
        self.swept.write().await.insert(*tenant_id, at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_is_once_per_tenant() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = Subscription::provision(TenantId::new(), Timestamp::now());

        assert_eq!(repo.insert(&sub).await.unwrap(), SaveResult::Inserted);
        assert_eq!(repo.insert(&sub).await.unwrap(), SaveResult::AlreadyExists);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn cas_bumps_version_on_match() {
        let repo = InMemorySubscriptionRepository::new();
        let mut sub = Subscription::provision(TenantId::new(), Timestamp::now());
        repo.insert(&sub).await.unwrap();

        sub.trial_used = true;
        let outcome = repo.compare_and_swap(&sub, 0).await.unwrap();
        assert_eq!(outcome, CasOutcome::Applied { new_version: 1 });

        let stored = repo.get(&sub.tenant_id).await.unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.trial_used);
    }

    #[tokio::test]
    async fn cas_rejects_stale_version() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = Subscription::provision(TenantId::new(), Timestamp::now());
        repo.insert(&sub).await.unwrap();
        repo.compare_and_swap(&sub, 0).await.unwrap();

        let outcome = repo.compare_and_swap(&sub, 0).await.unwrap();
        assert_eq!(outcome, CasOutcome::VersionMismatch);
    }

    #[tokio::test]
    async fn forced_conflict_moves_the_stored_version() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = Subscription::provision(TenantId::new(), Timestamp::now());
        repo.insert(&sub).await.unwrap();
        repo.force_conflicts(1);

        assert_eq!(
            repo.compare_and_swap(&sub, 0).await.unwrap(),
            CasOutcome::VersionMismatch
        );
        assert_eq!(
            repo.compare_and_swap(&sub, 1).await.unwrap(),
            CasOutcome::Applied { new_version: 2 }
        );
    }

    #[tokio::test]
    async fn finds_by_external_id() {
        let repo = InMemorySubscriptionRepository::new();
        let mut sub = Subscription::provision(TenantId::new(), Timestamp::now());
        sub.external_subscription_id = Some("sub_9".into());
        repo.put(sub.clone()).await;

        let found = repo.find_by_external_id("sub_9").await.unwrap();
        assert_eq!(found.map(|s| s.tenant_id), Some(sub.tenant_id));
        assert!(repo.find_by_external_id("sub_x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn swept_rows_go_to_the_back_of_the_line() {
        let repo = InMemorySubscriptionRepository::new();
        let now = Timestamp::now();
        let mut older = Subscription::provision(TenantId::new(), now.minus_days(2));
        older.pending_reconciliation = true;
        let mut newer = Subscription::provision(TenantId::new(), now.minus_days(1));
        newer.pending_reconciliation = true;
        repo.put(older.clone()).await;
        repo.put(newer.clone()).await;
        let query = SweepQuery {
            pending_before: now,
            stale_before: now.minus_days(35),
            now,
            limit: 1,
        };

        let first = repo.find_for_sweep(query).await.unwrap();
        assert_eq!(first[0].tenant_id, older.tenant_id);

        repo.mark_swept(&older.tenant_id, now).await.unwrap();
        let second = repo.find_for_sweep(query).await.unwrap();
        assert_eq!(second[0].tenant_id, newer.tenant_id);
        assert_eq!(repo.get(&older.tenant_id).await.unwrap(), older);
    }
}
