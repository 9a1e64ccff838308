//! Reminder Scheduler
//!
//! Periodic sweep over trialing subscriptions crossing the fixed reminder
//! thresholds (7, 2 and 1 days before trial end). Each (subscription,
//! threshold) pair produces at most one reminder; the dedupe check reads the
//! `reminder_sent` entries already in the billing event log.
//!
//! Delivery is at-least-once: the email goes out first and the dedupe event
//! is appended only after the send call returns, so a crash between the two
//! re-sends on the next sweep rather than silently under-delivering. Two
//! overlapping sweeps can both pass the dedupe check; that duplicate is an
//! accepted, documented risk.

use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime, Time};
use uuid::Uuid;

use crate::email::{EmailTemplate, ReminderEmailService};
use crate::error::BillingResult;
use crate::events::{BillingEventLogger, BillingEventType};
use crate::store::SubscriptionStore;

/// Days-before-expiry thresholds, one reminder per threshold
pub const REMINDER_THRESHOLDS: [i64; 3] = [7, 2, 1];

/// Outcome of one threshold sweep
#[derive(Debug, Clone, Serialize)]
pub struct ReminderSweepReport {
    pub threshold_days: i64,
    pub candidates: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Scheduler emitting trial-ending reminders
#[derive(Clone)]
pub struct ReminderScheduler {
    store: SubscriptionStore,
    events: BillingEventLogger,
    email: ReminderEmailService,
}

impl ReminderScheduler {
    pub fn new(pool: PgPool, email: ReminderEmailService) -> Self {
        Self {
            store: SubscriptionStore::new(pool.clone()),
            events: BillingEventLogger::new(pool),
            email,
        }
    }

    /// One-day window starting at the day boundary `days` days after `now`.
    ///
    /// The three thresholds operate on disjoint windows by construction, so
    /// ordering across thresholds does not matter.
    pub fn threshold_window(now: OffsetDateTime, days: i64) -> (OffsetDateTime, OffsetDateTime) {
        let start = (now + Duration::days(days)).replace_time(Time::MIDNIGHT);
        (start, start + Duration::days(1))
    }

    /// Run the sweeps for every threshold. A threshold that fails wholesale
    /// (storage unavailable) is reported and does not stop the others.
    pub async fn run_all_sweeps(&self, now: OffsetDateTime) -> Vec<ReminderSweepReport> {
        let mut reports = Vec::with_capacity(REMINDER_THRESHOLDS.len());

        for days in REMINDER_THRESHOLDS {
            match self.run_threshold_sweep(now, days).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(
                        threshold_days = days,
                        error = %e,
                        "Reminder sweep failed for threshold"
                    );
                }
            }
        }

        reports
    }

    /// Sweep one threshold: find trialing subscriptions ending inside the
    /// window, dedupe against the event log, send, then record.
    pub async fn run_threshold_sweep(
        &self,
        now: OffsetDateTime,
        days: i64,
    ) -> BillingResult<ReminderSweepReport> {
        let (window_start, window_end) = Self::threshold_window(now, days);

        let candidates = self
            .store
            .find_expiring_between(window_start, window_end)
            .await?;

        let mut report = ReminderSweepReport {
            threshold_days: days,
            candidates: candidates.len(),
            sent: 0,
            skipped: 0,
            failed: 0,
        };

        if candidates.is_empty() {
            return Ok(report);
        }

        tracing::info!(
            threshold_days = days,
            candidates = candidates.len(),
            window_start = %window_start,
            window_end = %window_end,
            "Running reminder sweep"
        );

        for subscription in candidates {
            match self
                .remind_one(subscription.org_id, subscription.id, subscription.trial_end, days)
                .await
            {
                Ok(true) => report.sent += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    // Per-candidate isolation: one bad record or one email
                    // failure never blocks the rest of the window.
                    report.failed += 1;
                    tracing::error!(
                        subscription_id = %subscription.id,
                        org_id = %subscription.org_id,
                        threshold_days = days,
                        error = %e,
                        "Failed to send reminder, continuing sweep"
                    );
                }
            }
        }

        tracing::info!(
            threshold_days = days,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Reminder sweep finished"
        );

        Ok(report)
    }

    /// Send one reminder if it has not been sent yet.
    /// Returns `Ok(false)` when the dedupe check skipped the candidate.
    async fn remind_one(
        &self,
        org_id: Uuid,
        subscription_id: Uuid,
        trial_end: Option<OffsetDateTime>,
        days: i64,
    ) -> BillingResult<bool> {
        if self
            .events
            .reminder_already_sent(subscription_id, days)
            .await?
        {
            tracing::debug!(
                subscription_id = %subscription_id,
                threshold_days = days,
                "Reminder already sent, skipping"
            );
            return Ok(false);
        }

        let (email, org_name) = match self.store.get_owner_email(org_id).await? {
            Some(pair) => pair,
            None => {
                tracing::warn!(
                    org_id = %org_id,
                    subscription_id = %subscription_id,
                    "No owner email found for reminder, skipping"
                );
                return Ok(false);
            }
        };

        let trial_end_date = trial_end
            .map(|t| t.date().to_string())
            .unwrap_or_else(|| "soon".to_string());

        // Email first, event second: at-least-once delivery.
        self.email
            .send_trial_reminder(&email, &org_name, days, &trial_end_date)
            .await?;

        self.events
            .append(
                org_id,
                Some(subscription_id),
                BillingEventType::ReminderSent,
                serde_json::json!({
                    "days_left": days,
                    "template": EmailTemplate::for_days_left(days).map(|t| t.key()),
                    "trial_end": trial_end.map(|t| t.unix_timestamp()),
                }),
            )
            .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_thresholds() {
        assert_eq!(REMINDER_THRESHOLDS, [7, 2, 1]);
    }

    #[test]
    fn test_threshold_window_is_day_aligned() {
        let now = datetime!(2024-01-03 15:42:10 UTC);
        let (start, end) = ReminderScheduler::threshold_window(now, 7);
        assert_eq!(start, datetime!(2024-01-10 00:00:00 UTC));
        assert_eq!(end, datetime!(2024-01-11 00:00:00 UTC));
    }

    #[test]
    fn test_threshold_windows_are_disjoint() {
        let now = datetime!(2024-01-03 09:00:00 UTC);
        let windows: Vec<_> = REMINDER_THRESHOLDS
            .iter()
            .map(|d| ReminderScheduler::threshold_window(now, *d))
            .collect();

        for (i, (start_a, end_a)) in windows.iter().enumerate() {
            for (start_b, end_b) in windows.iter().skip(i + 1) {
                assert!(end_a <= start_b || end_b <= start_a);
            }
        }
    }

    #[test]
    fn test_window_at_midnight_now() {
        let now = datetime!(2024-06-01 00:00:00 UTC);
        let (start, end) = ReminderScheduler::threshold_window(now, 1);
        assert_eq!(start, datetime!(2024-06-02 00:00:00 UTC));
        assert_eq!(end, datetime!(2024-06-03 00:00:00 UTC));
    }
}
