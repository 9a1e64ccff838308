//! Billing error types

use thiserror::Error;
use uuid::Uuid;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("No user matches provider customer email: {0}")]
    UserNotFound(String),

    #[error("No plan mapping for provider product: {0}")]
    UnknownProduct(String),

    #[error("User {0} already owns an organization")]
    AlreadyHasOrganization(Uuid),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook event type not supported: {0}")]
    WebhookEventNotSupported(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Billing invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::ExternalService(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
