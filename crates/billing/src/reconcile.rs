//! Provider Reconciler
//!
//! Maps payment-provider webhook events onto the local subscription record.
//! The local row is the single source of truth consulted by the access
//! evaluator; this module keeps it converged with the provider's view.
//!
//! Idempotent under redelivery: the org-keyed upsert converges to the same
//! final row no matter how many times an event is processed. The event log
//! may grow on redelivery; it is append-only and not deduplicated by
//! provider event id.

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEventLogger, BillingEventType};
use crate::plans::PlanCatalog;
use crate::store::{SubscriptionPatch, SubscriptionStore};
use crate::webhook::{ProviderEvent, ProviderEventKind, ProviderInvoice, ProviderSubscription};
use swiftfacture_shared::SubscriptionStatus;

/// Derive the local status from a provider status string.
///
/// Unknown provider statuses map to expired so they can never grant access.
pub fn map_provider_status(provider_status: &str) -> SubscriptionStatus {
    match provider_status {
        "active" => SubscriptionStatus::Active,
        "canceled" => SubscriptionStatus::Canceled,
        "past_due" => SubscriptionStatus::PastDue,
        _ => SubscriptionStatus::Expired,
    }
}

/// Webhook-driven reconciliation of provider state into local records
#[derive(Clone)]
pub struct ProviderReconciler {
    store: SubscriptionStore,
    events: BillingEventLogger,
    plans: PlanCatalog,
}

impl ProviderReconciler {
    pub fn new(pool: sqlx::PgPool, plans: PlanCatalog) -> Self {
        Self {
            store: SubscriptionStore::new(pool.clone()),
            events: BillingEventLogger::new(pool),
            plans,
        }
    }

    /// Process one verified provider event
    pub async fn handle_event(&self, event: ProviderEvent) -> BillingResult<()> {
        match event.kind() {
            ProviderEventKind::SubscriptionCreated | ProviderEventKind::SubscriptionUpdated => {
                self.reconcile_subscription(&event, None).await
            }
            // Deleted subscriptions land as canceled regardless of the
            // status text the provider attaches to the payload.
            ProviderEventKind::SubscriptionDeleted => {
                self.reconcile_subscription(&event, Some(SubscriptionStatus::Canceled))
                    .await
            }
            ProviderEventKind::TrialWillEnd => self.handle_trial_will_end(&event).await,
            ProviderEventKind::InvoicePaymentSucceeded => {
                self.handle_invoice(&event, BillingEventType::PaymentSucceeded)
                    .await
            }
            ProviderEventKind::InvoicePaymentFailed => {
                self.handle_invoice(&event, BillingEventType::PaymentFailed)
                    .await
            }
            ProviderEventKind::Unknown => {
                // Track which events we're not handling; helps identify new
                // provider events that may need handlers.
                tracing::info!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    "Received unhandled provider event type - no handler configured"
                );
                Ok(())
            }
        }
    }

    /// Resolve the organization a provider customer belongs to.
    ///
    /// A previously reconciled customer is found directly on the subscription
    /// row; otherwise the customer's billing email is matched against the
    /// user directory and the user's owned organization is used. Resolution
    /// failures are reported, not retried: they are data inconsistencies
    /// needing manual intervention.
    async fn resolve_organization(
        &self,
        customer_id: &str,
        customer_email: Option<&str>,
    ) -> BillingResult<Uuid> {
        if let Some(subscription) = self.store.get_by_provider_customer(customer_id).await? {
            return Ok(subscription.org_id);
        }

        let email = customer_email.ok_or_else(|| {
            BillingError::UserNotFound(format!(
                "provider customer {} carries no email and is not linked",
                customer_id
            ))
        })?;

        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(email.to_string()))?;

        let organization = self
            .store
            .get_organization_by_owner(user.id)
            .await?
            .ok_or_else(|| BillingError::OrganizationNotFound(user.id.to_string()))?;

        Ok(organization.id)
    }

    async fn reconcile_subscription(
        &self,
        event: &ProviderEvent,
        forced_status: Option<SubscriptionStatus>,
    ) -> BillingResult<()> {
        let provider_sub = event.subscription()?;

        let org_id = self
            .resolve_organization(&provider_sub.customer, provider_sub.customer_email.as_deref())
            .await?;

        let plan_id = match provider_sub.product.as_deref() {
            Some(product) => Some(
                self.plans
                    .plan_for_product(product)
                    .ok_or_else(|| BillingError::UnknownProduct(product.to_string()))?
                    .to_string(),
            ),
            None => None,
        };

        let status = forced_status.unwrap_or_else(|| map_provider_status(&provider_sub.status));

        // Find-or-create by organization: a customer who subscribed before
        // ever starting a trial still gets exactly one local record.
        let patch = SubscriptionPatch {
            plan_id,
            status: Some(status),
            current_period_start: period_bound(provider_sub.current_period_start),
            current_period_end: period_bound(provider_sub.current_period_end),
            provider_customer_id: Some(provider_sub.customer.clone()),
            provider_subscription_id: Some(provider_sub.id.clone()),
            ..Default::default()
        };
        let subscription = self.store.upsert(org_id, &patch).await?;

        if let Err(e) = self
            .events
            .append(
                org_id,
                Some(subscription.id),
                BillingEventType::for_status(status),
                serde_json::json!({
                    "provider_event_id": event.id,
                    "provider_subscription_id": provider_sub.id,
                    "provider_customer_id": provider_sub.customer,
                    "provider_status": provider_sub.status,
                }),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log subscription reconcile event");
        }

        tracing::info!(
            org_id = %org_id,
            subscription_id = %subscription.id,
            provider_subscription_id = %provider_sub.id,
            status = %status,
            "Subscription reconciled from provider event"
        );

        Ok(())
    }

    /// The provider announces the trial end a few days ahead. Local reminder
    /// timing is owned by the reminder scheduler, so this only leaves an
    /// audit entry.
    async fn handle_trial_will_end(&self, event: &ProviderEvent) -> BillingResult<()> {
        let provider_sub: ProviderSubscription = event.subscription()?;

        let org_id = self
            .resolve_organization(&provider_sub.customer, provider_sub.customer_email.as_deref())
            .await?;

        let subscription_id = self
            .store
            .get_by_organization(org_id)
            .await?
            .map(|s| s.id);

        self.events
            .append(
                org_id,
                subscription_id,
                BillingEventType::TrialWillEnd,
                serde_json::json!({
                    "provider_event_id": event.id,
                    "provider_subscription_id": provider_sub.id,
                    "trial_end": provider_sub.trial_end,
                }),
            )
            .await?;

        tracing::info!(
            org_id = %org_id,
            provider_subscription_id = %provider_sub.id,
            "Provider trial ending notice logged"
        );

        Ok(())
    }

    async fn handle_invoice(
        &self,
        event: &ProviderEvent,
        event_type: BillingEventType,
    ) -> BillingResult<()> {
        let invoice: ProviderInvoice = event.invoice()?;

        let org_id = self
            .resolve_organization(&invoice.customer, invoice.customer_email.as_deref())
            .await?;

        let subscription_id = self
            .store
            .get_by_organization(org_id)
            .await?
            .map(|s| s.id);

        self.events
            .append(
                org_id,
                subscription_id,
                event_type,
                serde_json::json!({
                    "provider_event_id": event.id,
                    "provider_invoice_id": invoice.id,
                    "provider_customer_id": invoice.customer,
                    "provider_subscription_id": invoice.subscription,
                    "amount_due": invoice.amount_due,
                    "amount_paid": invoice.amount_paid,
                }),
            )
            .await?;

        tracing::info!(
            org_id = %org_id,
            provider_invoice_id = %invoice.id,
            event_type = %event_type,
            "Invoice payment event logged"
        );

        Ok(())
    }
}

fn period_bound(ts: Option<i64>) -> Option<OffsetDateTime> {
    ts.and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_status_map() {
        assert_eq!(map_provider_status("active"), SubscriptionStatus::Active);
        assert_eq!(map_provider_status("canceled"), SubscriptionStatus::Canceled);
        assert_eq!(map_provider_status("past_due"), SubscriptionStatus::PastDue);
    }

    #[test]
    fn test_unknown_provider_status_never_grants() {
        // Conservative default: anything unrecognized lands as expired
        for status in ["unpaid", "incomplete", "paused", "trialing", ""] {
            assert_eq!(map_provider_status(status), SubscriptionStatus::Expired);
        }
    }

    #[test]
    fn test_period_bound_conversion() {
        assert_eq!(
            period_bound(Some(1704067200)).map(|t| t.unix_timestamp()),
            Some(1704067200)
        );
        assert_eq!(period_bound(None), None);
    }
}
