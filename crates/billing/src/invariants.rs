//! Billing Invariants Module
//!
//! Runnable consistency checks for the billing core. These can be run after
//! any mutation or webhook replay to confirm the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: each invariant is a real SQL query
//! 2. **Explanatory**: violations include enough context to debug
//! 3. **Non-destructive**: checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Organization(s) affected
    pub org_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - access or billing decisions may be wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    org_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TrialBoundsRow {
    id: Uuid,
    org_id: Uuid,
    trial_start: Option<OffsetDateTime>,
    trial_end: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct TrialingNoEndRow {
    id: Uuid,
    org_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateReminderRow {
    subscription_id: Uuid,
    days_left: String,
    reminder_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct UnknownStatusRow {
    id: Uuid,
    org_id: Uuid,
    status: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_subscription_per_org().await?);
        violations.extend(self.check_trial_bounds_ordered().await?);
        violations.extend(self.check_trialing_has_trial_end().await?);
        violations.extend(self.check_reminder_dedupe().await?);
        violations.extend(self.check_status_values_known().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: exactly one subscription row per organization
    ///
    /// The unique index on org_id should make this impossible; a violation
    /// means the index was dropped or bypassed.
    async fn check_single_subscription_per_org(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT org_id, COUNT(*) as sub_count
            FROM billing_subscriptions
            GROUP BY org_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_subscription_per_org".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization has {} subscription rows (expected 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: trial_end > trial_start whenever both are set
    async fn check_trial_bounds_ordered(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<TrialBoundsRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, trial_start, trial_end
            FROM billing_subscriptions
            WHERE trial_start IS NOT NULL
              AND trial_end IS NOT NULL
              AND trial_end <= trial_start
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "trial_bounds_ordered".to_string(),
                org_ids: vec![row.org_id],
                description: "Subscription has trial_end at or before trial_start".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.id,
                    "trial_start": row.trial_start.map(|t| t.unix_timestamp()),
                    "trial_end": row.trial_end.map(|t| t.unix_timestamp()),
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: trialing implies trial_end is non-null
    ///
    /// The access evaluator fails such rows closed, but they should never
    /// exist in the first place.
    async fn check_trialing_has_trial_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<TrialingNoEndRow> = sqlx::query_as(
            r#"
            SELECT id, org_id
            FROM billing_subscriptions
            WHERE status = 'trialing' AND trial_end IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "trialing_has_trial_end".to_string(),
                org_ids: vec![row.org_id],
                description: "Trialing subscription has no trial_end".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: at most one reminder_sent event per (subscription, threshold)
    ///
    /// Duplicates are possible under the documented overlapping-sweep race;
    /// surfacing them keeps that annoyance visible.
    async fn check_reminder_dedupe(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateReminderRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, metadata->>'days_left' as days_left, COUNT(*) as reminder_count
            FROM billing_events
            WHERE event_type = 'reminder_sent' AND subscription_id IS NOT NULL
            GROUP BY subscription_id, metadata->>'days_left'
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "reminder_dedupe".to_string(),
                org_ids: vec![],
                description: format!(
                    "Subscription received {} reminders for the {}-day threshold",
                    row.reminder_count, row.days_left
                ),
                context: serde_json::json!({
                    "subscription_id": row.subscription_id,
                    "days_left": row.days_left,
                    "reminder_count": row.reminder_count,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: every stored status parses into the closed enum
    async fn check_status_values_known(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnknownStatusRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, status
            FROM billing_subscriptions
            WHERE status NOT IN ('trialing', 'active', 'past_due', 'expired', 'canceled')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "status_values_known".to_string(),
                org_ids: vec![row.org_id],
                description: format!("Subscription carries unknown status '{}'", row.status),
                context: serde_json::json!({
                    "subscription_id": row.id,
                    "status": row.status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single named check
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_subscription_per_org" => self.check_single_subscription_per_org().await,
            "trial_bounds_ordered" => self.check_trial_bounds_ordered().await,
            "trialing_has_trial_end" => self.check_trialing_has_trial_end().await,
            "reminder_dedupe" => self.check_reminder_dedupe().await,
            "status_values_known" => self.check_status_values_known().await,
            _ => Ok(vec![]),
        }
    }

    /// Names of all available checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_subscription_per_org",
            "trial_bounds_ordered",
            "trialing_has_trial_end",
            "reminder_dedupe",
            "status_values_known",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
    }

    #[test]
    fn test_available_checks_cover_run_check() {
        // Every advertised name must dispatch to a real check
        assert_eq!(InvariantChecker::available_checks().len(), 5);
    }
}
