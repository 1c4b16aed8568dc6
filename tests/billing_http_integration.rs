//! Integration tests for the billing HTTP surface.
//!
//! Drives the full router over in-memory storage and the mock payment
//! provider. Webhooks go through the real background worker.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use factory_billing::adapters::http::billing::{SIGNATURE_HEADER, TENANT_HEADER};
use factory_billing::adapters::http::billing_router;
use factory_billing::adapters::memory::{
    InMemoryProductionActivityReader, InMemorySubscriptionRepository,
    InMemoryWebhookEventRepository,
};
use factory_billing::adapters::stripe::MockPaymentProvider;
use factory_billing::adapters::worker::{RetrySettings, WebhookWorker};
use factory_billing::application::billing::ReconciliationSweep;
use factory_billing::bootstrap::{assemble, BillingComponents, BillingOptions};
use factory_billing::domain::billing::{
    sign_payload, BillingInterval, PlanCatalog, PlanTierId, ProviderSubscriptionSnapshot,
    Subscription, SubscriptionStatus,
};
use factory_billing::domain::foundation::{TenantId, Timestamp};
use factory_billing::ports::PaymentError;

const WEBHOOK_SECRET: &str = "whsec_integration";

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Harness {
    app: Router,
    repo: InMemorySubscriptionRepository,
    ledger: InMemoryWebhookEventRepository,
    activity: InMemoryProductionActivityReader,
    provider: MockPaymentProvider,
    sweep: ReconciliationSweep,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
    /// Held but not running, so its queue fills up.
    _idle_worker: Option<WebhookWorker>,
}

fn harness() -> Harness {
    harness_with(1024, true)
}

fn harness_with(webhook_queue_capacity: usize, run_worker: bool) -> Harness {
    let repo = InMemorySubscriptionRepository::new();
    let ledger = InMemoryWebhookEventRepository::new();
    let activity = InMemoryProductionActivityReader::new();
    let provider = MockPaymentProvider::with_webhook_secret(WEBHOOK_SECRET);

    let provider_timeout = Duration::from_millis(200);
    let mut options = BillingOptions {
        provider_timeout,
        retry: RetrySettings {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        webhook_queue_capacity,
        ..BillingOptions::default()
    };
    options.change.provider_timeout = provider_timeout;
    options.sweep.provider_timeout = provider_timeout;

    let runtime = assemble(
        BillingComponents {
            subscriptions: Arc::new(repo.clone()),
            ledger: Arc::new(ledger.clone()),
            activity: Arc::new(activity.clone()),
            provider: Arc::new(provider.clone()),
            catalog: Arc::new(PlanCatalog::standard()),
        },
        options,
    );

    let (shutdown, rx) = watch::channel(false);
    let (worker, idle_worker) = if run_worker {
        (Some(tokio::spawn(runtime.worker.run(rx))), None)
    } else {
        (None, Some(runtime.worker))
    };

    Harness {
        app: billing_router(runtime.state),
        repo,
        ledger,
        activity,
        provider,
        sweep: runtime.sweep,
        shutdown,
        worker,
        _idle_worker: idle_worker,
    }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post(&self, tenant: TenantId, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .header(TENANT_HEADER, tenant.to_string())
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, tenant: TenantId, path: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(path)
                .header(TENANT_HEADER, tenant.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn webhook(&self, payload: Value) -> StatusCode {
        let body = payload.to_string();
        let signature =
            sign_payload(WEBHOOK_SECRET, Timestamp::now().as_unix_secs(), body.as_bytes()).unwrap();
        self.send(
            Request::builder()
                .method("POST")
                .uri("/webhooks/provider")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .0
    }

    async fn entitlement(&self, tenant: TenantId) -> Value {
        let (status, body) = self.get(tenant, "/billing/entitlement").await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    /// Stops the worker after it has drained every queued webhook.
    async fn drain_webhooks(self) -> (InMemorySubscriptionRepository, InMemoryWebhookEventRepository) {
        self.shutdown.send(true).unwrap();
        if let Some(worker) = self.worker {
            tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .unwrap()
                .unwrap();
        }
        (self.repo, self.ledger)
    }

    /// Polls until the stored subscription satisfies `done`.
    async fn wait_for(&self, tenant: TenantId, done: impl Fn(&Subscription) -> bool) -> Subscription {
        for _ in 0..200 {
            if let Some(sub) = self.repo.get(&tenant).await {
                if done(&sub) {
                    return sub;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subscription for {} never reached the expected state", tenant);
    }

    /// Seeds a paid, provider-backed subscription.
    async fn seed_active(
        &self,
        tier: PlanTierId,
        interval: BillingInterval,
        external_id: &str,
    ) -> (TenantId, Subscription) {
        let now = Timestamp::now();
        let tenant = TenantId::new();
        let mut sub = Subscription::provision(tenant, now.minus_days(40));
        sub.tier = tier;
        sub.interval = interval;
        sub.status = SubscriptionStatus::Active;
        sub.trial_used = true;
        sub.current_period_start = Some(now.minus_days(5));
        sub.current_period_end = Some(now.add_days(25));
        sub.external_subscription_id = Some(external_id.to_string());
        sub.external_customer_id = Some(format!("cus_{}", external_id));
        self.repo.put(sub.clone()).await;

        self.provider.add_subscription(ProviderSubscriptionSnapshot {
            external_subscription_id: external_id.to_string(),
            external_customer_id: sub.external_customer_id.clone(),
            tenant_id: Some(tenant),
            status: Some(SubscriptionStatus::Active),
            current_period_start: now.minus_days(5),
            current_period_end: now.add_days(25),
            cancel_at_period_end: false,
            tier: Some(tier),
            interval: Some(interval),
        });
        (tenant, sub)
    }
}

fn event(id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": id,
        "type": event_type,
        "created": Timestamp::now().as_unix_secs(),
        "livemode": false,
        "data": {"object": object}
    })
}

fn invoice(id: &str, external_subscription: &str) -> Value {
    json!({
        "id": id,
        "customer": format!("cus_{}", external_subscription),
        "subscription": external_subscription,
        "amount_due": 4900,
        "amount_paid": 0,
        "currency": "usd"
    })
}

// =============================================================================
// Plan changes
// =============================================================================

#[tokio::test]
async fn starter_to_growth_upgrades_immediately() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Starter, BillingInterval::Month, "sub_up")
        .await;

    let (status, body) = h
        .post(
            tenant,
            "/billing/change-subscription",
            json!({"newTier": "growth", "billingInterval": "month"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["changeType"], "upgrade");
    assert!(body.get("scheduledDate").is_none());

    let ent = h.entitlement(tenant).await;
    assert_eq!(ent["subscriptionTier"], "growth");
    assert_eq!(ent["lineLimit"], 10);

    let call = &h.provider.calls()[0];
    assert_eq!(call.method, "replace_plan");
    assert_eq!(call.args[3], "ProrateNow");
}

#[tokio::test]
async fn growth_to_starter_is_scheduled_for_period_end() {
    let h = harness();
    let (tenant, seeded) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Year, "sub_down")
        .await;

    let (status, body) = h
        .post(
            tenant,
            "/billing/change-subscription",
            json!({"newTier": "starter", "billingInterval": "year"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changeType"], "downgrade");
    assert_eq!(
        body["scheduledDate"],
        serde_json::to_value(seeded.current_period_end.unwrap()).unwrap()
    );
    assert_eq!(body["needsPaymentMethod"], true);
    assert!(!h.provider.was_called("replace_plan"));

    let ent = h.entitlement(tenant).await;
    assert_eq!(ent["subscriptionTier"], "growth");
    assert_eq!(ent["upcomingDowngrade"]["tier"], "starter");
}

#[tokio::test]
async fn downgrade_with_card_on_file_needs_no_payment_method() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Scale, BillingInterval::Month, "sub_card")
        .await;
    h.provider.add_payment_method("cus_sub_card");

    let (_, body) = h
        .post(
            tenant,
            "/billing/change-subscription",
            json!({"newTier": "growth", "billingInterval": "month"}),
        )
        .await;

    assert_eq!(body["changeType"], "downgrade");
    assert_eq!(body["needsPaymentMethod"], false);
}

#[tokio::test]
async fn upgrade_provider_timeout_leaves_plan_unchanged() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Starter, BillingInterval::Month, "sub_slow")
        .await;
    h.provider
        .set_method_delay("replace_plan", Duration::from_millis(500));

    let (status, body) = h
        .post(
            tenant,
            "/billing/change-subscription",
            json!({"newTier": "scale", "billingInterval": "month"}),
        )
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "PROVIDER_UNAVAILABLE");
    assert_eq!(body["retryable"], true);
    assert_eq!(h.repo.get(&tenant).await.unwrap().tier, PlanTierId::Starter);
}

#[tokio::test]
async fn enterprise_asks_for_sales_contact() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Scale, BillingInterval::Year, "sub_ent")
        .await;

    let (status, body) = h
        .post(
            tenant,
            "/billing/change-subscription",
            json!({"newTier": "enterprise", "billingInterval": "year"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contactSales"], true);
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn unknown_tier_is_rejected_before_provider() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Starter, BillingInterval::Month, "sub_bad")
        .await;

    let (status, body) = h
        .post(
            tenant,
            "/billing/change-subscription",
            json!({"newTier": "platinum", "billingInterval": "month"}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn change_without_subscription_is_not_found() {
    let h = harness();

    let (status, body) = h
        .post(
            TenantId::new(),
            "/billing/change-subscription",
            json!({"newTier": "growth", "billingInterval": "month"}),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

// =============================================================================
// Subscribe, trial, cancel
// =============================================================================

#[tokio::test]
async fn checkout_returns_provider_url_and_leaves_state() {
    let h = harness();
    let tenant = TenantId::new();

    let (status, body) = h
        .post(
            tenant,
            "/billing/create-checkout",
            json!({"tier": "growth", "interval": "month"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].as_str().unwrap().starts_with("https://checkout.mock.test/"));
    assert_eq!(h.repo.get(&tenant).await.unwrap().status, SubscriptionStatus::None);
}

#[tokio::test]
async fn second_trial_is_refused_without_state_change() {
    let h = harness();
    let tenant = TenantId::new();

    let (status, body) = h
        .post(
            tenant,
            "/billing/create-checkout",
            json!({"tier": "growth", "interval": "month", "startTrial": true}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trial"], true);
    assert!(h.provider.calls().is_empty(), "trials never reach the provider");

    let (status, _) = h.post(tenant, "/billing/cancel-subscription", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let before = h.repo.get(&tenant).await.unwrap();

    let (status, body) = h
        .post(
            tenant,
            "/billing/create-checkout",
            json!({"tier": "growth", "interval": "month", "startTrial": true}),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_TRIAL");
    assert_eq!(h.repo.get(&tenant).await.unwrap(), before);
}

#[tokio::test]
async fn subscribe_while_active_conflicts() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_dup")
        .await;

    let (status, body) = h
        .post(
            tenant,
            "/billing/create-checkout",
            json!({"tier": "scale", "interval": "month"}),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn cancel_removes_entitlement_immediately() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Scale, BillingInterval::Year, "sub_cancel")
        .await;

    let (status, body) = h.post(tenant, "/billing/cancel-subscription", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(h.provider.call_count("cancel_subscription"), 1);

    let ent = h.entitlement(tenant).await;
    assert_eq!(ent["subscriptionStatus"], "canceled");
    assert_eq!(ent["lineLimit"], 0);
    assert_eq!(ent["features"], json!([]));
}

#[tokio::test]
async fn entitlement_reports_usage_against_limit() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_usage")
        .await;
    for line in 0..10 {
        h.activity
            .record(tenant, format!("line-{}", line), Timestamp::now())
            .await;
    }

    let ent = h.entitlement(tenant).await;
    assert_eq!(ent["activeLines"], 10);
    assert_eq!(ent["atLimit"], true);
}

// =============================================================================
// Portal and history
// =============================================================================

#[tokio::test]
async fn portal_and_history_use_provider_customer() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_portal")
        .await;

    let (status, body) = h.post(tenant, "/billing/customer-portal", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].as_str().unwrap().contains("cus_sub_portal"));

    let (status, body) = h.get(tenant, "/billing/get-billing-history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoices"], json!([]));
    assert!(body.get("paymentMethods").is_some());
}

#[tokio::test]
async fn portal_without_customer_is_not_found() {
    let h = harness();
    let (status, _) = h.post(TenantId::new(), "/billing/customer-portal", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_tenant_header_is_unauthorized() {
    let h = harness();
    let (status, body) = h
        .send(
            Request::builder()
                .uri("/billing/entitlement")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TENANT_REQUIRED");
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness();
    let (status, body) = h
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

// =============================================================================
// Webhooks
// =============================================================================

#[tokio::test]
async fn payment_failure_then_payment_recovers() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_pay")
        .await;

    let status = h
        .webhook(event("evt_fail", "invoice.payment_failed", invoice("in_1", "sub_pay")))
        .await;
    assert_eq!(status, StatusCode::OK);
    h.wait_for(tenant, |s| s.status == SubscriptionStatus::PastDue)
        .await;

    let ent = h.entitlement(tenant).await;
    assert_eq!(ent["subscriptionStatus"], "past_due");
    assert_eq!(ent["features"], json!([]));

    h.webhook(event("evt_paid", "invoice.paid", invoice("in_1", "sub_pay")))
        .await;
    h.wait_for(tenant, |s| s.status == SubscriptionStatus::Active)
        .await;
}

#[tokio::test]
async fn duplicate_delivery_applies_once() {
    let h = harness();
    let (tenant, seeded) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_twice")
        .await;

    let payload = event("evt_same", "invoice.payment_failed", invoice("in_2", "sub_twice"));
    assert_eq!(h.webhook(payload.clone()).await, StatusCode::OK);
    assert_eq!(h.webhook(payload).await, StatusCode::OK);

    let (repo, ledger) = h.drain_webhooks().await;

    assert_eq!(ledger.len().await, 1);
    let stored = repo.get(&tenant).await.unwrap();
    assert_eq!(stored.status, SubscriptionStatus::PastDue);
    assert_eq!(stored.version, seeded.version + 1, "one state transition");
}

#[tokio::test]
async fn bad_signature_is_rejected_and_never_processed() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_forged")
        .await;
    let body = event("evt_forged", "invoice.payment_failed", invoice("in_3", "sub_forged"))
        .to_string();

    let (status, response) = h
        .send(
            Request::builder()
                .method("POST")
                .uri("/webhooks/provider")
                .header(SIGNATURE_HEADER, "t=1,v1=deadbeef")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["code"], "SIGNATURE_INVALID");

    let (repo, ledger) = h.drain_webhooks().await;
    assert_eq!(ledger.len().await, 0);
    assert_eq!(repo.get(&tenant).await.unwrap().status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn late_webhook_does_not_resurrect_canceled_subscription() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_race")
        .await;

    let (status, _) = h.post(tenant, "/billing/cancel-subscription", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let now = Timestamp::now();
    h.webhook(event(
        "evt_late",
        "customer.subscription.updated",
        json!({
            "id": "sub_race",
            "customer": "cus_sub_race",
            "status": "active",
            "current_period_start": now.minus_days(5).as_unix_secs(),
            "current_period_end": now.add_days(25).as_unix_secs(),
            "metadata": {"tenant_id": tenant.to_string(), "tier": "growth", "interval": "month"}
        }),
    ))
    .await;
    h.webhook(event("evt_late_paid", "invoice.paid", invoice("in_4", "sub_race")))
        .await;

    let (repo, ledger) = h.drain_webhooks().await;
    assert_eq!(ledger.len().await, 2);
    assert_eq!(repo.get(&tenant).await.unwrap().status, SubscriptionStatus::Canceled);
}

#[tokio::test]
async fn checkout_completion_activates_subscription() {
    let h = harness();
    let tenant = TenantId::new();
    let (status, _) = h
        .post(
            tenant,
            "/billing/create-checkout",
            json!({"tier": "scale", "interval": "year"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let now = Timestamp::now();
    h.provider.add_subscription(ProviderSubscriptionSnapshot {
        external_subscription_id: "sub_new".into(),
        external_customer_id: Some("cus_new".into()),
        tenant_id: Some(tenant),
        status: Some(SubscriptionStatus::Active),
        current_period_start: now,
        current_period_end: now.add_days(365),
        cancel_at_period_end: false,
        tier: Some(PlanTierId::Scale),
        interval: Some(BillingInterval::Year),
    });

    h.webhook(event(
        "evt_checkout",
        "checkout.session.completed",
        json!({
            "id": "cs_1",
            "customer": "cus_new",
            "subscription": "sub_new",
            "client_reference_id": tenant.to_string()
        }),
    ))
    .await;

    let sub = h
        .wait_for(tenant, |s| s.status == SubscriptionStatus::Active)
        .await;
    assert_eq!(sub.tier, PlanTierId::Scale);
    assert_eq!(sub.external_customer_id.as_deref(), Some("cus_new"));

    let ent = h.entitlement(tenant).await;
    assert_eq!(ent["subscriptionTier"], "scale");
}

#[tokio::test]
async fn transient_provider_failure_during_webhook_is_retried() {
    let h = harness();
    let tenant = TenantId::new();
    let now = Timestamp::now();
    h.provider.add_subscription(ProviderSubscriptionSnapshot {
        external_subscription_id: "sub_retry".into(),
        external_customer_id: Some("cus_retry".into()),
        tenant_id: Some(tenant),
        status: Some(SubscriptionStatus::Active),
        current_period_start: now,
        current_period_end: now.add_days(30),
        cancel_at_period_end: false,
        tier: Some(PlanTierId::Growth),
        interval: Some(BillingInterval::Month),
    });
    h.provider.set_error(PaymentError::network("connection reset"));

    let status = h
        .webhook(event(
            "evt_retry",
            "checkout.session.completed",
            json!({
                "id": "cs_2",
                "customer": "cus_retry",
                "subscription": "sub_retry",
                "metadata": {"tenant_id": tenant.to_string()}
            }),
        ))
        .await;

    assert_eq!(status, StatusCode::OK, "acknowledged before processing");
    h.wait_for(tenant, |s| s.status == SubscriptionStatus::Active)
        .await;
    assert_eq!(h.provider.call_count("get_subscription"), 2);
}

#[tokio::test]
async fn full_queue_still_acknowledges_and_sweep_applies_event() {
    let h = harness_with(1, false);
    let (first, _) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_q1")
        .await;
    let (second, _) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_q2")
        .await;

    let status = h
        .webhook(event("evt_q1", "invoice.payment_failed", invoice("in_q1", "sub_q1")))
        .await;
    assert_eq!(status, StatusCode::OK);
    let status = h
        .webhook(event("evt_q2", "invoice.payment_failed", invoice("in_q2", "sub_q2")))
        .await;
    assert_eq!(status, StatusCode::OK, "acknowledged with the queue full");

    assert_eq!(h.ledger.staged_len().await, 2);
    assert_eq!(h.repo.get(&second).await.unwrap().status, SubscriptionStatus::Active);

    let report = h
        .sweep
        .run_once(Timestamp::now().add_days(1))
        .await
        .unwrap();

    assert_eq!(report.events_retried, 2);
    assert_eq!(h.repo.get(&first).await.unwrap().status, SubscriptionStatus::PastDue);
    assert_eq!(h.repo.get(&second).await.unwrap().status, SubscriptionStatus::PastDue);
    assert_eq!(h.ledger.len().await, 2);
    assert_eq!(h.ledger.staged_len().await, 0);
}

#[tokio::test]
async fn redelivery_of_staged_event_is_acknowledged_once() {
    let h = harness_with(1, false);
    let (tenant, seeded) = h
        .seed_active(PlanTierId::Growth, BillingInterval::Month, "sub_redeliver")
        .await;
    let payload = event("evt_again", "invoice.payment_failed", invoice("in_r", "sub_redeliver"));

    assert_eq!(h.webhook(payload.clone()).await, StatusCode::OK);
    assert_eq!(h.webhook(payload).await, StatusCode::OK);
    assert_eq!(h.ledger.staged_len().await, 1);

    h.sweep
        .run_once(Timestamp::now().add_days(1))
        .await
        .unwrap();

    let stored = h.repo.get(&tenant).await.unwrap();
    assert_eq!(stored.status, SubscriptionStatus::PastDue);
    assert_eq!(stored.version, seeded.version + 1);
}

// =============================================================================
// Reconciliation sweep
// =============================================================================

#[tokio::test]
async fn sweep_applies_due_downgrade() {
    let h = harness();
    let (tenant, _) = h
        .seed_active(PlanTierId::Scale, BillingInterval::Month, "sub_roll")
        .await;

    let (_, body) = h
        .post(
            tenant,
            "/billing/change-subscription",
            json!({"newTier": "starter", "billingInterval": "month"}),
        )
        .await;
    assert_eq!(body["changeType"], "downgrade");

    let later = Timestamp::now().add_days(26);
    let report = h.sweep.run_once(later).await.unwrap();

    assert_eq!(report.rolled_over, 1);
    let stored = h.repo.get(&tenant).await.unwrap();
    assert_eq!(stored.tier, PlanTierId::Starter);
    assert!(stored.pending_downgrade.is_none());
    let call = h
        .provider
        .calls()
        .into_iter()
        .find(|c| c.method == "replace_plan")
        .unwrap();
    assert_eq!(call.args[3], "None");
}
