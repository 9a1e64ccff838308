// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! SwiftFacture Billing Module
//!
//! The trial and subscription lifecycle core: trial creation, access checks,
//! expiry transitions, reminder scheduling, and webhook-driven
//! reconciliation with the payment provider.
//!
//! ## Features
//!
//! - **Trial Lifecycle**: organization bootstrap with a 30-day trial, expiry sweep
//! - **Access Evaluation**: pure, fail-closed decision from the subscription record
//! - **Reminders**: 7/2/1-day trial-ending reminders, once per threshold
//! - **Reconciliation**: provider webhook events upserted onto local records
//! - **Event Log**: append-only billing events for audit and dedupe
//! - **Invariants**: runnable consistency checks over the billing tables

pub mod access;
pub mod email;
pub mod error;
pub mod events;
pub mod invariants;
pub mod plans;
pub mod reconcile;
pub mod reminders;
pub mod store;
pub mod trial;
pub mod webhook;

// Access
pub use access::{
    evaluate, AccessContext, AccessDecision, AccessService, DenialReason, TrialCountdown,
};

// Email
pub use email::{EmailConfig, EmailTemplate, ReminderEmailService};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{BillingEvent, BillingEventLogger, BillingEventType};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Plans
pub use plans::{PlanCatalog, TRIAL_DAYS, TRIAL_PLAN_ID};

// Reconcile
pub use reconcile::{map_provider_status, ProviderReconciler};

// Reminders
pub use reminders::{ReminderScheduler, ReminderSweepReport, REMINDER_THRESHOLDS};

// Store
pub use store::{SubscriptionPatch, SubscriptionStore};

// Trial
pub use trial::{TrialLifecycleManager, TrialStart};

// Webhook
pub use webhook::{
    ProviderEvent, ProviderEventKind, ProviderInvoice, ProviderSubscription, WebhookVerifier,
    SIGNATURE_HEADER,
};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub store: SubscriptionStore,
    pub events: BillingEventLogger,
    pub email: ReminderEmailService,
    pub access: AccessService,
    pub trial: TrialLifecycleManager,
    pub reminders: ReminderScheduler,
    pub reconciler: ProviderReconciler,
    pub webhooks: WebhookVerifier,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let webhooks = WebhookVerifier::from_env()?;
        let email = ReminderEmailService::from_env();
        let plans = PlanCatalog::from_env();
        Ok(Self::new(pool, webhooks, email, plans))
    }

    /// Create a new billing service with explicit collaborators
    pub fn new(
        pool: PgPool,
        webhooks: WebhookVerifier,
        email: ReminderEmailService,
        plans: PlanCatalog,
    ) -> Self {
        Self {
            store: SubscriptionStore::new(pool.clone()),
            events: BillingEventLogger::new(pool.clone()),
            access: AccessService::new(pool.clone()),
            trial: TrialLifecycleManager::new(pool.clone(), email.clone()),
            reminders: ReminderScheduler::new(pool.clone(), email.clone()),
            reconciler: ProviderReconciler::new(pool, plans),
            email,
            webhooks,
        }
    }
}
