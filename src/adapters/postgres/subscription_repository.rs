//! PostgreSQL implementation of SubscriptionRepository.
//!
//! One row per tenant. Every update is a compare-and-swap on `version`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{
    BillingInterval, PendingDowngrade, PlanTierId, Subscription, SubscriptionStatus,
};
use crate::domain::foundation::{DomainError, ErrorCode, TenantId, Timestamp};
use crate::ports::{CasOutcome, SaveResult, SubscriptionRepository, SweepQuery};

const SELECT_COLUMNS: &str = r#"
    tenant_id, tier, billing_interval, status, current_period_start, current_period_end,
    cancel_at_period_end, pending_downgrade_tier, pending_downgrade_interval,
    pending_downgrade_effective_at, external_subscription_id, external_customer_id,
    trial_used, pending_reconciliation, canceled_at, version, created_at, updated_at
"#;

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    tenant_id: Uuid,
    tier: String,
    billing_interval: String,
    status: String,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    pending_downgrade_tier: Option<String>,
    pending_downgrade_interval: Option<String>,
    pending_downgrade_effective_at: Option<DateTime<Utc>>,
    external_subscription_id: Option<String>,
    external_customer_id: Option<String>,
    trial_used: bool,
    pending_reconciliation: bool,
    canceled_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let pending_downgrade = match (
            row.pending_downgrade_tier,
            row.pending_downgrade_interval,
            row.pending_downgrade_effective_at,
        ) {
            (Some(tier), interval, Some(effective_at)) => Some(PendingDowngrade {
                tier: parse_column::<PlanTierId>("pending_downgrade_tier", &tier)?,
                interval: match interval {
                    Some(i) => parse_column::<BillingInterval>("pending_downgrade_interval", &i)?,
                    None => parse_column::<BillingInterval>("billing_interval", &row.billing_interval)?,
                },
                effective_at: Timestamp::from_datetime(effective_at),
            }),
            _ => None,
        };

        Ok(Subscription {
            tenant_id: TenantId::from_uuid(row.tenant_id),
            tier: parse_column("tier", &row.tier)?,
            interval: parse_column("billing_interval", &row.billing_interval)?,
            status: parse_column::<SubscriptionStatus>("status", &row.status)?,
            current_period_start: row.current_period_start.map(Timestamp::from_datetime),
            current_period_end: row.current_period_end.map(Timestamp::from_datetime),
            cancel_at_period_end: row.cancel_at_period_end,
            pending_downgrade,
            external_subscription_id: row.external_subscription_id,
            external_customer_id: row.external_customer_id,
            trial_used: row.trial_used,
            pending_reconciliation: row.pending_reconciliation,
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
            version: row.version,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

fn parse_column<T: std::str::FromStr>(column: &str, value: &str) -> Result<T, DomainError> {
    value.parse::<T>().map_err(|_| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid {} value: {}", column, value),
        )
    })
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::database(format!("{}: {}", context, e))
}

fn opt_datetime(ts: Option<Timestamp>) -> Option<DateTime<Utc>> {
    ts.map(|t| *t.as_datetime())
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<SaveResult, DomainError> {
        let pending = subscription.pending_downgrade;
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                tenant_id, tier, billing_interval, status, current_period_start,
                current_period_end, cancel_at_period_end, pending_downgrade_tier,
                pending_downgrade_interval, pending_downgrade_effective_at,
                external_subscription_id, external_customer_id, trial_used,
                pending_reconciliation, canceled_at, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
        )
        .bind(subscription.tenant_id.as_uuid())
        .bind(subscription.tier.as_str())
        .bind(subscription.interval.as_str())
        .bind(subscription.status.as_str())
        .bind(opt_datetime(subscription.current_period_start))
        .bind(opt_datetime(subscription.current_period_end))
        .bind(subscription.cancel_at_period_end)
        .bind(pending.map(|p| p.tier.as_str()))
        .bind(pending.map(|p| p.interval.as_str()))
        .bind(opt_datetime(pending.map(|p| p.effective_at)))
        .bind(&subscription.external_subscription_id)
        .bind(&subscription.external_customer_id)
        .bind(subscription.trial_used)
        .bind(subscription.pending_reconciliation)
        .bind(opt_datetime(subscription.canceled_at))
        .bind(subscription.version)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert subscription", e))?;

        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn find_by_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE tenant_id = $1",
            SELECT_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE external_subscription_id = $1 LIMIT 1",
            SELECT_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(external_subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load subscription by external id", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn compare_and_swap(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<CasOutcome, DomainError> {
        let pending = subscription.pending_downgrade;
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                tier = $3,
                billing_interval = $4,
                status = $5,
                current_period_start = $6,
                current_period_end = $7,
                cancel_at_period_end = $8,
                pending_downgrade_tier = $9,
                pending_downgrade_interval = $10,
                pending_downgrade_effective_at = $11,
                external_subscription_id = $12,
                external_customer_id = $13,
                trial_used = $14,
                pending_reconciliation = $15,
                canceled_at = $16,
                updated_at = $17,
                version = version + 1
            WHERE tenant_id = $1 AND version = $2
            "#,
        )
        .bind(subscription.tenant_id.as_uuid())
        .bind(expected_version)
        .bind(subscription.tier.as_str())
        .bind(subscription.interval.as_str())
        .bind(subscription.status.as_str())
        .bind(opt_datetime(subscription.current_period_start))
        .bind(opt_datetime(subscription.current_period_end))
        .bind(subscription.cancel_at_period_end)
        .bind(pending.map(|p| p.tier.as_str()))
        .bind(pending.map(|p| p.interval.as_str()))
        .bind(opt_datetime(pending.map(|p| p.effective_at)))
        .bind(&subscription.external_subscription_id)
        .bind(&subscription.external_customer_id)
        .bind(subscription.trial_used)
        .bind(subscription.pending_reconciliation)
        .bind(opt_datetime(subscription.canceled_at))
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update subscription", e))?;

        if result.rows_affected() == 0 {
            return Ok(CasOutcome::VersionMismatch);
        }
        Ok(CasOutcome::Applied {
            new_version: expected_version + 1,
        })
    }

    async fn find_for_sweep(&self, query: SweepQuery) -> Result<Vec<Subscription>, DomainError> {
        let sql = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE (pending_reconciliation AND updated_at < $1)
               OR (external_subscription_id IS NOT NULL
                   AND status NOT IN ('canceled', 'expired')
                   AND updated_at < $2)
               OR (pending_downgrade_effective_at IS NOT NULL
                   AND pending_downgrade_effective_at <= $3)
            ORDER BY last_swept_at NULLS FIRST, updated_at
            LIMIT $4
            "#,
            SELECT_COLUMNS
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(query.pending_before.as_datetime())
            .bind(query.stale_before.as_datetime())
            .bind(query.now.as_datetime())
            .bind(i64::from(query.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to select subscriptions for sweep", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn mark_swept(&self, tenant_id: &TenantId, at: Timestamp) -> Result<(), DomainError> {
        sqlx::query("UPDATE subscriptions SET last_swept_at = $2 WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .bind(at.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to mark subscription swept", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tenant: Uuid) -> SubscriptionRow {
        let now = Utc::now();
        SubscriptionRow {
            tenant_id: tenant,
            tier: "growth".into(),
            billing_interval: "year".into(),
            status: "active".into(),
            current_period_start: Some(now),
            current_period_end: Some(now),
            cancel_at_period_end: false,
            pending_downgrade_tier: None,
            pending_downgrade_interval: None,
            pending_downgrade_effective_at: None,
            external_subscription_id: Some("sub_1".into()),
            external_customer_id: Some("cus_1".into()),
            trial_used: true,
            pending_reconciliation: false,
            canceled_at: None,
            version: 7,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_maps_to_aggregate() {
        let tenant = Uuid::new_v4();
        let sub = Subscription::try_from(row(tenant)).unwrap();

        assert_eq!(sub.tenant_id, TenantId::from_uuid(tenant));
        assert_eq!(sub.tier, PlanTierId::Growth);
        assert_eq!(sub.interval, BillingInterval::Year);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.version, 7);
        assert!(sub.pending_downgrade.is_none());
    }

    #[test]
    fn pending_downgrade_columns_are_combined() {
        let mut r = row(Uuid::new_v4());
        r.pending_downgrade_tier = Some("starter".into());
        r.pending_downgrade_interval = Some("month".into());
        r.pending_downgrade_effective_at = Some(Utc::now());

        let pending = Subscription::try_from(r).unwrap().pending_downgrade.unwrap();
        assert_eq!(pending.tier, PlanTierId::Starter);
        assert_eq!(pending.interval, BillingInterval::Month);
    }

    #[test]
    fn unknown_status_is_a_database_error() {
        let mut r = row(Uuid::new_v4());
        r.status = "paused".into();

        let err = Subscription::try_from(r).unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }
}
