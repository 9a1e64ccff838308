//! Billing Events Module
//!
//! Provides append-only billing event logging for audit trails and debugging.
//! Events capture every billing state transition and can be used to:
//! - Answer "why does this org have access?" questions
//! - Reconstruct a subscription's history
//! - Back the reminder dedupe check without a second table
//!
//! The log is never mutated or deleted by this core.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use swiftfacture_shared::SubscriptionStatus;

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    // Trial lifecycle
    TrialStarted,
    TrialExpired,
    TrialWillEnd,

    // Reminders
    ReminderSent,

    // Provider-derived subscription states
    SubscriptionActive,
    SubscriptionPastDue,
    SubscriptionCanceled,
    SubscriptionExpired,

    // Payments
    PaymentSucceeded,
    PaymentFailed,
}

impl BillingEventType {
    /// Event tag for a provider-derived subscription status.
    pub fn for_status(status: SubscriptionStatus) -> Self {
        match status {
            SubscriptionStatus::Active => Self::SubscriptionActive,
            SubscriptionStatus::PastDue => Self::SubscriptionPastDue,
            SubscriptionStatus::Canceled => Self::SubscriptionCanceled,
            SubscriptionStatus::Expired => Self::SubscriptionExpired,
            // The reconciler's status map never produces trialing; trials
            // are tagged at creation.
            SubscriptionStatus::Trialing => Self::TrialStarted,
        }
    }
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::TrialStarted => "trial_started",
            BillingEventType::TrialExpired => "trial_expired",
            BillingEventType::TrialWillEnd => "trial_will_end",
            BillingEventType::ReminderSent => "reminder_sent",
            BillingEventType::SubscriptionActive => "subscription_active",
            BillingEventType::SubscriptionPastDue => "subscription_past_due",
            BillingEventType::SubscriptionCanceled => "subscription_canceled",
            BillingEventType::SubscriptionExpired => "subscription_expired",
            BillingEventType::PaymentSucceeded => "payment_succeeded",
            BillingEventType::PaymentFailed => "payment_failed",
        };
        write!(f, "{}", s)
    }
}

/// A billing event record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
}

/// Service for appending and querying billing events
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a billing event to the log
    pub async fn append(
        &self,
        org_id: Uuid,
        subscription_id: Option<Uuid>,
        event_type: BillingEventType,
        metadata: serde_json::Value,
    ) -> BillingResult<Uuid> {
        let event_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO billing_events (org_id, subscription_id, event_type, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(org_id)
        .bind(subscription_id)
        .bind(event_type.to_string())
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(event_id.0)
    }

    /// Check whether a reminder for this (subscription, threshold) pair has
    /// already been logged. Backs the ReminderScheduler dedupe.
    pub async fn reminder_already_sent(
        &self,
        subscription_id: Uuid,
        days_left: i64,
    ) -> BillingResult<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM billing_events
                WHERE subscription_id = $1
                  AND event_type = 'reminder_sent'
                  AND (metadata->>'days_left')::BIGINT = $2
            )
            "#,
        )
        .bind(subscription_id)
        .bind(days_left)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    /// Get recent events for an organization
    pub async fn get_events_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT id, org_id, subscription_id, event_type, metadata, created_at
            FROM billing_events
            WHERE org_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Get events of one type for a subscription
    pub async fn get_events_for_subscription(
        &self,
        subscription_id: Uuid,
        event_type: BillingEventType,
        limit: i64,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT id, org_id, subscription_id, event_type, metadata, created_at
            FROM billing_events
            WHERE subscription_id = $1 AND event_type = $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(subscription_id)
        .bind(event_type.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Count events of one type for a subscription
    pub async fn count_events(
        &self,
        subscription_id: Uuid,
        event_type: BillingEventType,
    ) -> BillingResult<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM billing_events WHERE subscription_id = $1 AND event_type = $2",
        )
        .bind(subscription_id)
        .bind(event_type.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tags() {
        assert_eq!(BillingEventType::TrialStarted.to_string(), "trial_started");
        assert_eq!(BillingEventType::TrialExpired.to_string(), "trial_expired");
        assert_eq!(BillingEventType::ReminderSent.to_string(), "reminder_sent");
        assert_eq!(
            BillingEventType::SubscriptionPastDue.to_string(),
            "subscription_past_due"
        );
        assert_eq!(
            BillingEventType::PaymentFailed.to_string(),
            "payment_failed"
        );
    }

    #[test]
    fn test_event_type_for_status() {
        assert_eq!(
            BillingEventType::for_status(SubscriptionStatus::Active),
            BillingEventType::SubscriptionActive
        );
        assert_eq!(
            BillingEventType::for_status(SubscriptionStatus::Canceled),
            BillingEventType::SubscriptionCanceled
        );
        assert_eq!(
            BillingEventType::for_status(SubscriptionStatus::Expired),
            BillingEventType::SubscriptionExpired
        );
    }
}
