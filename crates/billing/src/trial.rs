//! Trial Lifecycle Manager
//!
//! Owns trial creation (organization bootstrap + subscription record +
//! initial event) and the trial expiry transition. This is the only code
//! path that writes `status = 'expired'` from a trial timeout; provider
//! events flow through the reconciler instead.

use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::email::ReminderEmailService;
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEventLogger, BillingEventType};
use crate::plans::{TRIAL_DAYS, TRIAL_PLAN_ID};
use crate::store::SubscriptionStore;
use swiftfacture_shared::{Organization, Subscription};

/// Result of starting a trial
#[derive(Debug, Clone, Serialize)]
pub struct TrialStart {
    pub organization: Organization,
    pub subscription: Subscription,
}

/// Manager for trial creation and expiry transitions
#[derive(Clone)]
pub struct TrialLifecycleManager {
    pool: PgPool,
    store: SubscriptionStore,
    events: BillingEventLogger,
    email: ReminderEmailService,
}

impl TrialLifecycleManager {
    pub fn new(pool: PgPool, email: ReminderEmailService) -> Self {
        Self {
            store: SubscriptionStore::new(pool.clone()),
            events: BillingEventLogger::new(pool.clone()),
            email,
            pool,
        }
    }

    /// Bootstrap a new organization with a 30-day trial subscription.
    ///
    /// Organization, subscription and the `trial_started` event are inserted
    /// in one transaction so a partial bootstrap can never be observed.
    /// Fails with `AlreadyHasOrganization` if the user already owns one.
    pub async fn start_trial(
        &self,
        user_id: Uuid,
        org_name: Option<&str>,
    ) -> BillingResult<TrialStart> {
        if let Some(existing) = self.store.get_organization_by_owner(user_id).await? {
            tracing::warn!(
                user_id = %user_id,
                org_id = %existing.id,
                "Trial start rejected: user already owns an organization"
            );
            return Err(BillingError::AlreadyHasOrganization(user_id));
        }

        let name = org_name.unwrap_or("My workspace");
        let now = OffsetDateTime::now_utc();
        let trial_end = now + Duration::days(TRIAL_DAYS);

        let mut tx = self.pool.begin().await?;

        let organization: Organization = sqlx::query_as(
            r#"
            INSERT INTO organizations (id, name, owner_user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id, name, owner_user_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(user_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // The unique index on owner_user_id closes the race between the
            // existence check above and this insert.
            if e.as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false)
            {
                BillingError::AlreadyHasOrganization(user_id)
            } else {
                BillingError::Database(e.to_string())
            }
        })?;

        let subscription: Subscription = sqlx::query_as(
            r#"
            INSERT INTO billing_subscriptions (
                id, org_id, plan_id, status, trial_start, trial_end, created_at, updated_at
            ) VALUES ($1, $2, $3, 'trialing', $4, $5, $4, $4)
            RETURNING id, org_id, plan_id, status, trial_start, trial_end,
                      current_period_start, current_period_end,
                      provider_customer_id, provider_subscription_id,
                      created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(organization.id)
        .bind(TRIAL_PLAN_ID)
        .bind(now)
        .bind(trial_end)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO billing_events (org_id, subscription_id, event_type, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(organization.id)
        .bind(subscription.id)
        .bind(BillingEventType::TrialStarted.to_string())
        .bind(serde_json::json!({
            "plan_id": TRIAL_PLAN_ID,
            "trial_end": trial_end.unix_timestamp(),
        }))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            org_id = %organization.id,
            subscription_id = %subscription.id,
            trial_end = %trial_end,
            "Trial started"
        );

        // Welcome email is outside the transaction and non-fatal
        if let Some(user) = self.store.get_user(user_id).await? {
            let trial_end_date = trial_end.date().to_string();
            if let Err(e) = self
                .email
                .send_trial_welcome(&user.email, &organization.name, &trial_end_date)
                .await
            {
                tracing::error!(error = %e, "Failed to send welcome email");
            }
        }

        Ok(TrialStart {
            organization,
            subscription,
        })
    }

    /// Flip one overdue trialing subscription to expired.
    ///
    /// Idempotent: the guarded UPDATE only matches rows still trialing, so a
    /// second call is a no-op and logs no second event. Returns whether a
    /// transition happened.
    pub async fn expire_trial(&self, subscription_id: Uuid) -> BillingResult<bool> {
        let transitioned: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE billing_subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE id = $1 AND status = 'trialing'
            RETURNING org_id
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        let org_id = match transitioned {
            Some((org_id,)) => org_id,
            None => {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    "Trial already expired, nothing to do"
                );
                return Ok(false);
            }
        };

        self.events
            .append(
                org_id,
                Some(subscription_id),
                BillingEventType::TrialExpired,
                serde_json::json!({}),
            )
            .await?;

        tracing::info!(
            org_id = %org_id,
            subscription_id = %subscription_id,
            "Trial expired"
        );

        if let Some((email, org_name)) = self.store.get_owner_email(org_id).await? {
            if let Err(e) = self.email.send_trial_expired(&email, &org_name).await {
                tracing::error!(error = %e, "Failed to send trial expired email");
            }
        }

        Ok(true)
    }

    /// Sweep entry point: expire every trialing subscription whose trial end
    /// is behind `now`. Safe to re-run; per-subscription failures are logged
    /// and do not abort the sweep. Returns the number of transitions made.
    pub async fn expire_all_overdue_trials(&self, now: OffsetDateTime) -> BillingResult<usize> {
        let overdue = self.store.find_expired_trials(now).await?;

        if overdue.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = overdue.len(), "Expiring overdue trials");

        let mut expired = 0;
        for subscription in overdue {
            match self.expire_trial(subscription.id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        org_id = %subscription.org_id,
                        error = %e,
                        "Failed to expire trial, continuing sweep"
                    );
                }
            }
        }

        Ok(expired)
    }
}
