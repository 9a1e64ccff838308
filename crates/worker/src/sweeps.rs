//! Time-triggered billing sweeps
//!
//! The worker invokes these on a fixed schedule. Both sweeps are idempotent
//! per subscription, so retrying a failed run is always safe; transient
//! storage failures are retried in place with exponential backoff.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

use swiftfacture_billing::{BillingResult, BillingService};

/// Backoff for transient sweep failures: 500ms, ~1s, ~2s
fn retry_strategy() -> impl Iterator<Item = std::time::Duration> {
    ExponentialBackoff::from_millis(500).map(jitter).take(3)
}

/// Expire every trialing subscription whose trial end has passed
pub async fn run_trial_expiry_sweep(billing: Arc<BillingService>) -> BillingResult<usize> {
    let expired = Retry::spawn(retry_strategy(), || async {
        let now = OffsetDateTime::now_utc();
        billing.trial.expire_all_overdue_trials(now).await
    })
    .await?;

    if expired > 0 {
        tracing::info!(expired = expired, "Trial expiry sweep finished");
    }

    Ok(expired)
}

/// Send trial-ending reminders for all thresholds
pub async fn run_reminder_sweep(billing: Arc<BillingService>) -> BillingResult<()> {
    // run_all_sweeps isolates per-threshold failures internally; the retry
    // here covers the case where storage was unreachable outright.
    let reports = Retry::spawn(retry_strategy(), || async {
        let now = OffsetDateTime::now_utc();
        let reports = billing.reminders.run_all_sweeps(now).await;
        if reports.is_empty() {
            Err(swiftfacture_billing::BillingError::ExternalService(
                "all reminder sweeps failed".to_string(),
            ))
        } else {
            Ok(reports)
        }
    })
    .await?;

    for report in reports {
        tracing::info!(
            threshold_days = report.threshold_days,
            candidates = report.candidates,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Reminder sweep report"
        );
    }

    Ok(())
}
