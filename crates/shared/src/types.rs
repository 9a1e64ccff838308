//! Common types used across SwiftFacture

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Organization ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub Uuid);

impl OrgId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for OrgId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Subscription status
///
/// Stored as text in the database; rows are decoded with `status: String` and
/// parsed at decision points so an unrecognized value can be handled
/// explicitly instead of failing row decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Expired,
    Canceled,
}

impl SubscriptionStatus {
    /// Whether this status is terminal for the billing core.
    /// Reactivation goes through the reconciler's upsert, not a status-only
    /// transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Canceled)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trialing => write!(f, "trialing"),
            Self::Active => write!(f, "active"),
            Self::PastDue => write!(f, "past_due"),
            Self::Expired => write!(f, "expired"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "expired" => Ok(Self::Expired),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Organization (billing unit) model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Owner user reference; unique, one organization per owner
    pub owner_user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// User directory entry
///
/// Written by the external auth system; this core only reads it to resolve
/// provider customers by email.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: OffsetDateTime,
}

/// Subscription model (one row per organization)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub org_id: Uuid,
    pub plan_id: String,
    pub status: String,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Parse the stored status text into the closed enum.
    pub fn parsed_status(&self) -> Result<SubscriptionStatus, String> {
        self.status.parse()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_status_display() {
        assert_eq!(SubscriptionStatus::Trialing.to_string(), "trialing");
        assert_eq!(SubscriptionStatus::PastDue.to_string(), "past_due");
        assert_eq!(SubscriptionStatus::Canceled.to_string(), "canceled");
    }

    #[test]
    fn test_subscription_status_from_str() {
        assert_eq!(
            "trialing".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Trialing
        );
        assert_eq!(
            "PAST_DUE".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::PastDue
        );
        assert!("incomplete".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_subscription_status_round_trip() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Canceled,
        ] {
            assert_eq!(
                status.to_string().parse::<SubscriptionStatus>().unwrap(),
                status
            );
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SubscriptionStatus::Expired.is_terminal());
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(!SubscriptionStatus::Trialing.is_terminal());
        assert!(!SubscriptionStatus::Active.is_terminal());
        assert!(!SubscriptionStatus::PastDue.is_terminal());
    }

    #[test]
    fn test_org_id_new() {
        let id1 = OrgId::new();
        let id2 = OrgId::new();
        assert_ne!(id1, id2); // Each new ID should be unique
    }

    #[test]
    fn test_user_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let user_id: UserId = uuid.into();
        assert_eq!(user_id.0, uuid);
    }
}
