//! Access Evaluator
//!
//! Answers "does this user's organization have access right now?" from a
//! subscription record and a reference timestamp.
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: `evaluate()` is THE function that decides access
//! 2. **Deterministic**: same inputs always produce the same decision
//! 3. **Pure**: never mutates the record; an overdue trialing row is denied
//!    here and persisted as expired elsewhere (trial lifecycle manager)
//! 4. **Fail closed**: missing or unrecognized state never grants access

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::store::SubscriptionStore;
use swiftfacture_shared::{Organization, Subscription, SubscriptionStatus};

/// Trial countdown attached to a granted trialing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialCountdown {
    /// Whole days until the trial ends, rounded up; 0 on the final calendar day
    pub days_left: i64,
    pub trial_end: OffsetDateTime,
}

/// Why access was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NoOrganization,
    NoSubscription,
    TrialExpired,
    SubscriptionExpired,
    SubscriptionCanceled,
    SubscriptionPastDue,
    UnknownStatus,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOrganization => write!(f, "no_organization"),
            Self::NoSubscription => write!(f, "no_subscription"),
            Self::TrialExpired => write!(f, "trial_expired"),
            Self::SubscriptionExpired => write!(f, "subscription_expired"),
            Self::SubscriptionCanceled => write!(f, "subscription_canceled"),
            Self::SubscriptionPastDue => write!(f, "subscription_past_due"),
            Self::UnknownStatus => write!(f, "unknown_status"),
        }
    }
}

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Granted {
        plan_id: String,
        trial: Option<TrialCountdown>,
    },
    Denied {
        reason: DenialReason,
    },
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// The already-loaded billing state an access decision is computed from
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub organization: Option<Organization>,
    pub subscription: Option<Subscription>,
}

/// Whole days until `end`, rounded up so the final calendar day still shows
/// as "0 days left". Negative spans clamp to 0 for display; the grant test
/// itself is the unclamped `now <= end` comparison.
pub fn days_until(end: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let secs = (end - now).whole_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + 86_400 - 1) / 86_400
    }
}

/// Pure decision function. No side effects, no clock reads, no mutation.
pub fn evaluate(ctx: &AccessContext, now: OffsetDateTime) -> AccessDecision {
    if ctx.organization.is_none() {
        return AccessDecision::Denied {
            reason: DenialReason::NoOrganization,
        };
    }

    let subscription = match &ctx.subscription {
        Some(s) => s,
        None => {
            return AccessDecision::Denied {
                reason: DenialReason::NoSubscription,
            }
        }
    };

    let status = match subscription.parsed_status() {
        Ok(status) => status,
        // Never silently grant on an unrecognized status value
        Err(_) => {
            return AccessDecision::Denied {
                reason: DenialReason::UnknownStatus,
            }
        }
    };

    match status {
        SubscriptionStatus::Active => AccessDecision::Granted {
            plan_id: subscription.plan_id.clone(),
            trial: None,
        },
        SubscriptionStatus::Trialing => match subscription.trial_end {
            Some(trial_end) if now <= trial_end => AccessDecision::Granted {
                plan_id: subscription.plan_id.clone(),
                trial: Some(TrialCountdown {
                    days_left: days_until(trial_end, now),
                    trial_end,
                }),
            },
            // Overdue, or a trialing row missing its trial_end (invariant
            // breach): fail closed without touching the record.
            _ => AccessDecision::Denied {
                reason: DenialReason::TrialExpired,
            },
        },
        SubscriptionStatus::PastDue => AccessDecision::Denied {
            reason: DenialReason::SubscriptionPastDue,
        },
        SubscriptionStatus::Expired => AccessDecision::Denied {
            reason: DenialReason::SubscriptionExpired,
        },
        SubscriptionStatus::Canceled => AccessDecision::Denied {
            reason: DenialReason::SubscriptionCanceled,
        },
    }
}

/// Loads billing state and runs the pure evaluator over it.
///
/// The service itself never persists anything; callers that want the overdue
/// trialing row flipped to expired invoke the trial lifecycle manager.
#[derive(Clone)]
pub struct AccessService {
    store: SubscriptionStore,
}

impl AccessService {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            store: SubscriptionStore::new(pool),
        }
    }

    /// Load the organization + subscription state for a user
    pub async fn load_context(&self, user_id: uuid::Uuid) -> BillingResult<AccessContext> {
        let organization = self.store.get_organization_by_owner(user_id).await?;

        let subscription = match &organization {
            Some(org) => self.store.get_by_organization(org.id).await?,
            None => None,
        };

        Ok(AccessContext {
            organization,
            subscription,
        })
    }

    /// Full access check for a user at `now`
    pub async fn check_access(
        &self,
        user_id: uuid::Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<AccessDecision> {
        let ctx = self.load_context(user_id).await?;
        Ok(evaluate(&ctx, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use uuid::Uuid;

    fn subscription_with(status: &str, trial_end: Option<OffsetDateTime>) -> Subscription {
        let now = OffsetDateTime::now_utc();
        Subscription {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            plan_id: "trial-30".to_string(),
            status: status.to_string(),
            trial_start: trial_end.map(|e| e - Duration::days(30)),
            trial_end,
            current_period_start: None,
            current_period_end: None,
            provider_customer_id: None,
            provider_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn organization() -> Organization {
        let now = OffsetDateTime::now_utc();
        Organization {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            owner_user_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx(subscription: Option<Subscription>) -> AccessContext {
        AccessContext {
            organization: Some(organization()),
            subscription,
        }
    }

    #[test]
    fn test_no_organization_denied() {
        let decision = evaluate(
            &AccessContext {
                organization: None,
                subscription: None,
            },
            OffsetDateTime::now_utc(),
        );
        assert_eq!(
            decision,
            AccessDecision::Denied {
                reason: DenialReason::NoOrganization
            }
        );
    }

    #[test]
    fn test_no_subscription_denied() {
        let decision = evaluate(&ctx(None), OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            AccessDecision::Denied {
                reason: DenialReason::NoSubscription
            }
        );
    }

    #[test]
    fn test_active_granted_without_trial_block() {
        let mut sub = subscription_with("active", None);
        sub.plan_id = "professional".to_string();
        let decision = evaluate(&ctx(Some(sub)), OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            AccessDecision::Granted {
                plan_id: "professional".to_string(),
                trial: None
            }
        );
    }

    #[test]
    fn test_trial_expired_one_second_ago_denied() {
        let now = OffsetDateTime::now_utc();
        let sub = subscription_with("trialing", Some(now - Duration::seconds(1)));
        let decision = evaluate(&ctx(Some(sub)), now);
        assert_eq!(
            decision,
            AccessDecision::Denied {
                reason: DenialReason::TrialExpired
            }
        );
    }

    #[test]
    fn test_trial_ending_in_one_second_granted() {
        let now = OffsetDateTime::now_utc();
        let sub = subscription_with("trialing", Some(now + Duration::seconds(1)));
        match evaluate(&ctx(Some(sub)), now) {
            AccessDecision::Granted { trial: Some(t), .. } => {
                assert!(t.days_left >= 0);
            }
            other => panic!("expected granted with trial, got {:?}", other),
        }
    }

    #[test]
    fn test_trial_end_exactly_now_granted_with_zero_days() {
        let now = OffsetDateTime::now_utc();
        let sub = subscription_with("trialing", Some(now));
        match evaluate(&ctx(Some(sub)), now) {
            AccessDecision::Granted { trial: Some(t), .. } => {
                assert_eq!(t.days_left, 0);
            }
            other => panic!("expected granted with trial, got {:?}", other),
        }
    }

    #[test]
    fn test_fresh_thirty_day_trial_counts_thirty_days() {
        let now = OffsetDateTime::now_utc();
        let sub = subscription_with("trialing", Some(now + Duration::days(30)));
        match evaluate(&ctx(Some(sub)), now) {
            AccessDecision::Granted { trial: Some(t), .. } => {
                assert_eq!(t.days_left, 30);
            }
            other => panic!("expected granted with trial, got {:?}", other),
        }
    }

    #[test]
    fn test_trialing_without_trial_end_fails_closed() {
        let sub = subscription_with("trialing", None);
        let decision = evaluate(&ctx(Some(sub)), OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            AccessDecision::Denied {
                reason: DenialReason::TrialExpired
            }
        );
    }

    #[test]
    fn test_terminal_statuses_mirror_reason() {
        let now = OffsetDateTime::now_utc();
        for (status, reason) in [
            ("expired", DenialReason::SubscriptionExpired),
            ("canceled", DenialReason::SubscriptionCanceled),
            ("past_due", DenialReason::SubscriptionPastDue),
        ] {
            let decision = evaluate(&ctx(Some(subscription_with(status, None))), now);
            assert_eq!(decision, AccessDecision::Denied { reason });
        }
    }

    #[test]
    fn test_unrecognized_status_never_grants() {
        let sub = subscription_with("incomplete_expired", None);
        let decision = evaluate(&ctx(Some(sub)), OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            AccessDecision::Denied {
                reason: DenialReason::UnknownStatus
            }
        );
    }

    #[test]
    fn test_days_until_rounds_up() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(days_until(now, now), 0);
        assert_eq!(days_until(now + Duration::seconds(1), now), 1);
        assert_eq!(days_until(now + Duration::hours(25), now), 2);
        assert_eq!(days_until(now + Duration::days(7), now), 7);
        // Negative spans clamp to zero for display
        assert_eq!(days_until(now - Duration::days(3), now), 0);
    }
}
