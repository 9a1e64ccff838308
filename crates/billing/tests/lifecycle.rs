//! Integration tests for the trial and subscription lifecycle
//!
//! These tests drive the full path through the store: trial bootstrap,
//! expiry idempotence, reminder dedupe, and webhook reconciliation replay.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://localhost/swiftfacture_test"
//! cargo test --test lifecycle -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::HashMap;

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use swiftfacture_billing::{
    evaluate, AccessDecision, BillingError, BillingEventType, BillingService, DenialReason,
    EmailConfig, InvariantChecker, PlanCatalog, ProviderEvent, ReminderEmailService,
    SubscriptionPatch, WebhookVerifier, TRIAL_PLAN_ID,
};
use swiftfacture_shared::SubscriptionStatus;

// ============================================================================
// Test Utilities
// ============================================================================

/// Connect to the test database and build a billing service with a disabled
/// email sender and a fixed plan catalog.
async fn setup() -> (BillingService, PgPool) {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    // Empty API key disables outbound email; sweeps still log reminder events
    let email = ReminderEmailService::new(EmailConfig {
        resend_api_key: String::new(),
        email_from: "SwiftFacture <noreply@swiftfacture.test>".to_string(),
        app_name: "SwiftFacture".to_string(),
        support_email: "support@swiftfacture.test".to_string(),
        dashboard_url: "https://app.swiftfacture.test".to_string(),
    });

    let mut products = HashMap::new();
    products.insert("prod_professional".to_string(), "professional".to_string());
    let plans = PlanCatalog::new(products);

    let billing = BillingService::new(
        pool.clone(),
        WebhookVerifier::new("whsec_test_secret"),
        email,
        plans,
    );
    (billing, pool)
}

/// Insert a user-directory entry the trial flow and reconciler can resolve
async fn create_test_user(pool: &PgPool) -> (Uuid, String) {
    let user_id = Uuid::new_v4();
    let email = format!("owner-{}@example.com", user_id.simple());
    sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2)")
        .bind(user_id)
        .bind(&email)
        .execute(pool)
        .await
        .expect("Failed to insert test user");
    (user_id, email)
}

fn subscription_event(
    event_id: &str,
    kind: &str,
    customer: &str,
    email: &str,
    status: &str,
) -> ProviderEvent {
    let payload = serde_json::json!({
        "id": event_id,
        "type": kind,
        "created": 1704067200,
        "data": {
            "object": {
                "id": "sub_prov_1",
                "customer": customer,
                "customer_email": email,
                "status": status,
                "product": "prod_professional",
                "current_period_start": 1704067200,
                "current_period_end": 1706745600
            }
        }
    });
    serde_json::from_value(payload).unwrap()
}

// ============================================================================
// Trial lifecycle
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn start_trial_creates_thirty_day_trial_and_grants_access() {
    let (billing, pool) = setup().await;
    let (user_id, _) = create_test_user(&pool).await;

    let trial = billing
        .trial
        .start_trial(user_id, Some("Acme"))
        .await
        .expect("start_trial failed");

    assert_eq!(trial.organization.name, "Acme");
    assert_eq!(trial.subscription.plan_id, TRIAL_PLAN_ID);
    assert_eq!(trial.subscription.status, "trialing");

    let trial_start = trial.subscription.trial_start.unwrap();
    let trial_end = trial.subscription.trial_end.unwrap();
    assert_eq!(trial_end - trial_start, Duration::days(30));

    let events = billing
        .events
        .get_events_for_subscription(trial.subscription.id, BillingEventType::TrialStarted, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);

    let org = billing
        .store
        .get_organization(trial.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(org.owner_user_id, user_id);

    let org_events = billing
        .events
        .get_events_for_org(trial.organization.id, 10)
        .await
        .unwrap();
    assert_eq!(org_events.len(), 1);
    assert_eq!(org_events[0].event_type, "trial_started");

    let decision = billing
        .access
        .check_access(user_id, OffsetDateTime::now_utc())
        .await
        .unwrap();
    match decision {
        AccessDecision::Granted { plan_id, trial } => {
            assert_eq!(plan_id, TRIAL_PLAN_ID);
            assert_eq!(trial.unwrap().days_left, 30);
        }
        other => panic!("expected granted, got {:?}", other),
    }
}

#[tokio::test]
#[ignore] // Requires database
async fn second_trial_for_same_owner_is_rejected_without_new_records() {
    let (billing, pool) = setup().await;
    let (user_id, _) = create_test_user(&pool).await;

    billing
        .trial
        .start_trial(user_id, Some("Acme"))
        .await
        .expect("first start_trial failed");

    let err = billing
        .trial
        .start_trial(user_id, Some("Acme Again"))
        .await
        .expect_err("second start_trial should fail");
    assert!(matches!(err, BillingError::AlreadyHasOrganization(_)));

    let org_count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM organizations WHERE owner_user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(org_count.0, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn expire_trial_twice_is_idempotent() {
    let (billing, pool) = setup().await;
    let (user_id, _) = create_test_user(&pool).await;

    let trial = billing.trial.start_trial(user_id, None).await.unwrap();

    // Push the trial into the past
    sqlx::query(
        "UPDATE billing_subscriptions SET trial_end = NOW() - INTERVAL '1 hour' WHERE id = $1",
    )
    .bind(trial.subscription.id)
    .execute(&pool)
    .await
    .unwrap();

    let first = billing.trial.expire_trial(trial.subscription.id).await.unwrap();
    let second = billing.trial.expire_trial(trial.subscription.id).await.unwrap();
    assert!(first);
    assert!(!second);

    let expired_events = billing
        .events
        .count_events(trial.subscription.id, BillingEventType::TrialExpired)
        .await
        .unwrap();
    assert_eq!(expired_events, 1);

    let status: (String,) =
        sqlx::query_as("SELECT status FROM billing_subscriptions WHERE id = $1")
            .bind(trial.subscription.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status.0, "expired");
}

#[tokio::test]
#[ignore] // Requires database
async fn overdue_sweep_expires_and_access_is_denied_before_and_after() {
    let (billing, pool) = setup().await;
    let (user_id, _) = create_test_user(&pool).await;

    let trial = billing.trial.start_trial(user_id, None).await.unwrap();
    sqlx::query(
        "UPDATE billing_subscriptions SET trial_end = NOW() - INTERVAL '1 second' WHERE id = $1",
    )
    .bind(trial.subscription.id)
    .execute(&pool)
    .await
    .unwrap();

    // The evaluator computes from timestamps for the trialing case, so the
    // reason is trial_expired even before the sweep persists the status.
    let now = OffsetDateTime::now_utc();
    let before = billing.access.check_access(user_id, now).await.unwrap();
    assert_eq!(
        before,
        AccessDecision::Denied {
            reason: DenialReason::TrialExpired
        }
    );

    let expired = billing.trial.expire_all_overdue_trials(now).await.unwrap();
    assert!(expired >= 1);

    let after = billing.access.check_access(user_id, now).await.unwrap();
    assert_eq!(
        after,
        AccessDecision::Denied {
            reason: DenialReason::SubscriptionExpired
        }
    );
}

// ============================================================================
// Reminders
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn reminder_sweep_twice_sends_once_per_threshold() {
    let (billing, pool) = setup().await;
    let (user_id, _) = create_test_user(&pool).await;

    let trial = billing.trial.start_trial(user_id, None).await.unwrap();

    // Place the trial end inside the 7-day window measured from now
    let now = OffsetDateTime::now_utc();
    let in_window = (now + Duration::days(7)).replace_time(time::Time::MIDNIGHT)
        + Duration::hours(12);
    sqlx::query("UPDATE billing_subscriptions SET trial_end = $1 WHERE id = $2")
        .bind(in_window)
        .bind(trial.subscription.id)
        .execute(&pool)
        .await
        .unwrap();

    let first = billing.reminders.run_threshold_sweep(now, 7).await.unwrap();
    assert_eq!(first.sent, 1);

    let second = billing.reminders.run_threshold_sweep(now, 7).await.unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(second.skipped, 1);

    let reminders = billing
        .events
        .count_events(trial.subscription.id, BillingEventType::ReminderSent)
        .await
        .unwrap();
    assert_eq!(reminders, 1);
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn webhook_replay_converges_to_one_subscription() {
    let (billing, pool) = setup().await;
    let (user_id, email) = create_test_user(&pool).await;

    let trial = billing.trial.start_trial(user_id, Some("Replay Org")).await.unwrap();
    let customer = format!("cus_{}", Uuid::new_v4().simple());

    let event = subscription_event(
        "evt_replay_1",
        "customer.subscription.updated",
        &customer,
        &email,
        "active",
    );
    billing.reconciler.handle_event(event.clone()).await.unwrap();
    billing.reconciler.handle_event(event).await.unwrap();

    let sub_count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM billing_subscriptions WHERE org_id = $1")
            .bind(trial.organization.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(sub_count.0, 1);

    let record = billing
        .store
        .get_by_organization(trial.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "active");
    assert_eq!(record.plan_id, "professional");
    assert_eq!(record.provider_customer_id.as_deref(), Some(customer.as_str()));
    assert_eq!(record.provider_subscription_id.as_deref(), Some("sub_prov_1"));
    assert!(record.current_period_start.is_some());
    assert!(record.current_period_end.is_some());

    // Access flips to granted on the professional plan, no trial block
    let decision = billing
        .access
        .check_access(user_id, OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert_eq!(
        decision,
        AccessDecision::Granted {
            plan_id: "professional".to_string(),
            trial: None
        }
    );

    let active_events = billing
        .events
        .count_events(record.id, BillingEventType::SubscriptionActive)
        .await
        .unwrap();
    assert!(active_events >= 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn reconciler_creates_subscription_for_org_without_trial() {
    let (billing, pool) = setup().await;
    let (user_id, email) = create_test_user(&pool).await;

    // Organization exists but never went through start_trial
    let org_id = Uuid::new_v4();
    sqlx::query("INSERT INTO organizations (id, name, owner_user_id) VALUES ($1, 'No Trial Org', $2)")
        .bind(org_id)
        .bind(user_id)
        .execute(&pool)
        .await
        .unwrap();

    let event = subscription_event(
        "evt_fresh_1",
        "customer.subscription.created",
        "cus_no_trial",
        &email,
        "active",
    );
    billing.reconciler.handle_event(event).await.unwrap();

    let record = billing.store.get_by_organization(org_id).await.unwrap();
    assert!(record.is_some());
    assert_eq!(record.unwrap().status, "active");
}

#[tokio::test]
#[ignore] // Requires database
async fn reconciler_rejects_unknown_customer_email() {
    let (billing, _pool) = setup().await;

    let event = subscription_event(
        "evt_unknown_1",
        "customer.subscription.updated",
        "cus_unknown",
        "nobody@example.com",
        "active",
    );
    let err = billing.reconciler.handle_event(event).await.unwrap_err();
    assert!(matches!(err, BillingError::UserNotFound(_)));
}

#[tokio::test]
#[ignore] // Requires database
async fn deleted_subscription_lands_as_canceled() {
    let (billing, pool) = setup().await;
    let (user_id, email) = create_test_user(&pool).await;
    let trial = billing.trial.start_trial(user_id, None).await.unwrap();

    let event = subscription_event(
        "evt_del_1",
        "customer.subscription.deleted",
        "cus_del_1",
        &email,
        "active",
    );
    billing.reconciler.handle_event(event).await.unwrap();

    let record = billing
        .store
        .get_by_organization(trial.organization.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "canceled");
}

// ============================================================================
// Store semantics
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn upsert_patch_does_not_clobber_unsupplied_fields() {
    let (billing, pool) = setup().await;
    let (user_id, _) = create_test_user(&pool).await;
    let trial = billing.trial.start_trial(user_id, None).await.unwrap();

    let patch = SubscriptionPatch {
        status: Some(SubscriptionStatus::Active),
        ..Default::default()
    };
    let updated = billing.store.upsert(trial.organization.id, &patch).await.unwrap();

    // Status changed, trial bounds and plan untouched
    assert_eq!(updated.status, "active");
    assert_eq!(updated.plan_id, TRIAL_PLAN_ID);
    assert_eq!(updated.trial_start, trial.subscription.trial_start);
    assert_eq!(updated.trial_end, trial.subscription.trial_end);
    assert_eq!(updated.id, trial.subscription.id);
}

#[tokio::test]
#[ignore] // Requires database
async fn invariant_checks_hold_after_lifecycle_operations() {
    let (billing, pool) = setup().await;
    let (user_id, _) = create_test_user(&pool).await;
    billing.trial.start_trial(user_id, None).await.unwrap();

    let checker = InvariantChecker::new(pool);
    let summary = checker.run_all_checks().await.unwrap();
    assert_eq!(summary.checks_run, 5);
    assert!(summary.healthy, "violations: {:?}", summary.violations);
}

#[tokio::test]
#[ignore] // Requires database
async fn evaluator_is_consistent_with_stored_rows() {
    let (billing, pool) = setup().await;
    let (user_id, _) = create_test_user(&pool).await;
    let _trial = billing.trial.start_trial(user_id, None).await.unwrap();

    let ctx = billing.access.load_context(user_id).await.unwrap();
    let now = OffsetDateTime::now_utc();
    assert!(evaluate(&ctx, now).is_granted());
}
