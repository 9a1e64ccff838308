//! Subscription Record Store
//!
//! Typed read/write access to the persisted organization, user-directory and
//! subscription records. All other billing components go through this store;
//! it is the single source of truth consulted by the access evaluator.
//!
//! Operations are atomic at the single-record level. The
//! one-subscription-per-organization invariant is enforced by the unique
//! index on `billing_subscriptions.org_id` together with the upsert's
//! `ON CONFLICT (org_id)` arm, not by a cross-record transaction.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use swiftfacture_shared::{Organization, Subscription, SubscriptionStatus, User};

/// Named-field patch for `SubscriptionStore::upsert`.
///
/// `None` fields are left untouched on update and fall back to the trial
/// defaults on insert. A patch can therefore never clear a stored value.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub plan_id: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
}

/// Store for subscription, organization and user-directory records
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: PgPool,
}

impl SubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Get the subscription owned by an organization
    pub async fn get_by_organization(&self, org_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> = sqlx::query_as(
            r#"
            SELECT id, org_id, plan_id, status, trial_start, trial_end,
                   current_period_start, current_period_end,
                   provider_customer_id, provider_subscription_id,
                   created_at, updated_at
            FROM billing_subscriptions
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// Get a subscription by the payment provider's customer id
    ///
    /// Used by the reconciler when the organization is not yet known.
    pub async fn get_by_provider_customer(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> = sqlx::query_as(
            r#"
            SELECT id, org_id, plan_id, status, trial_start, trial_end,
                   current_period_start, current_period_end,
                   provider_customer_id, provider_subscription_id,
                   created_at, updated_at
            FROM billing_subscriptions
            WHERE provider_customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// Create or patch the organization's subscription in one statement.
    ///
    /// Two concurrent calls for the same organization converge to one record;
    /// last writer wins on the patched fields.
    pub async fn upsert(
        &self,
        org_id: Uuid,
        patch: &SubscriptionPatch,
    ) -> BillingResult<Subscription> {
        let subscription: Subscription = sqlx::query_as(
            r#"
            INSERT INTO billing_subscriptions (
                id, org_id, plan_id, status, trial_start, trial_end,
                current_period_start, current_period_end,
                provider_customer_id, provider_subscription_id,
                created_at, updated_at
            ) VALUES (
                $1, $2, COALESCE($3, 'trial-30'), COALESCE($4, 'trialing'),
                $5, $6, $7, $8, $9, $10, NOW(), NOW()
            )
            ON CONFLICT (org_id) DO UPDATE SET
                plan_id = COALESCE($3, billing_subscriptions.plan_id),
                status = COALESCE($4, billing_subscriptions.status),
                trial_start = COALESCE($5, billing_subscriptions.trial_start),
                trial_end = COALESCE($6, billing_subscriptions.trial_end),
                current_period_start = COALESCE($7, billing_subscriptions.current_period_start),
                current_period_end = COALESCE($8, billing_subscriptions.current_period_end),
                provider_customer_id = COALESCE($9, billing_subscriptions.provider_customer_id),
                provider_subscription_id = COALESCE($10, billing_subscriptions.provider_subscription_id),
                updated_at = NOW()
            RETURNING id, org_id, plan_id, status, trial_start, trial_end,
                      current_period_start, current_period_end,
                      provider_customer_id, provider_subscription_id,
                      created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(patch.plan_id.as_deref())
        .bind(patch.status.map(|s| s.to_string()))
        .bind(patch.trial_start)
        .bind(patch.trial_end)
        .bind(patch.current_period_start)
        .bind(patch.current_period_end)
        .bind(patch.provider_customer_id.as_deref())
        .bind(patch.provider_subscription_id.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// Trialing subscriptions whose trial ends within [start, end)
    pub async fn find_expiring_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>> {
        let subscriptions: Vec<Subscription> = sqlx::query_as(
            r#"
            SELECT id, org_id, plan_id, status, trial_start, trial_end,
                   current_period_start, current_period_end,
                   provider_customer_id, provider_subscription_id,
                   created_at, updated_at
            FROM billing_subscriptions
            WHERE status = 'trialing'
              AND trial_end >= $1
              AND trial_end < $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Trialing subscriptions whose trial end is already behind `now`
    pub async fn find_expired_trials(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>> {
        let subscriptions: Vec<Subscription> = sqlx::query_as(
            r#"
            SELECT id, org_id, plan_id, status, trial_start, trial_end,
                   current_period_start, current_period_end,
                   provider_customer_id, provider_subscription_id,
                   created_at, updated_at
            FROM billing_subscriptions
            WHERE status = 'trialing'
              AND trial_end < $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    // =========================================================================
    // Organizations
    // =========================================================================

    pub async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>> {
        let org: Option<Organization> = sqlx::query_as(
            r#"
            SELECT id, name, owner_user_id, created_at, updated_at
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    /// Get the organization owned by a user (one per owner)
    pub async fn get_organization_by_owner(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<Organization>> {
        let org: Option<Organization> = sqlx::query_as(
            r#"
            SELECT id, name, owner_user_id, created_at, updated_at
            FROM organizations
            WHERE owner_user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    // =========================================================================
    // User directory (read-only, written by the auth system)
    // =========================================================================

    pub async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<User>> {
        let user: Option<User> =
            sqlx::query_as("SELECT id, email, created_at FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    /// Resolve a provider customer's email against the user directory
    pub async fn find_user_by_email(&self, email: &str) -> BillingResult<Option<User>> {
        let user: Option<User> =
            sqlx::query_as("SELECT id, email, created_at FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    /// Get the org owner's email and org name for sending notifications
    pub async fn get_owner_email(&self, org_id: Uuid) -> BillingResult<Option<(String, String)>> {
        let result: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT u.email, o.name
            FROM organizations o
            JOIN users u ON u.id = o.owner_user_id
            WHERE o.id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }
}
