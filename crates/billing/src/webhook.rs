//! Payment provider webhook verification and wire types
//!
//! Verifies the provider's `t=<unix>,v1=<hex>` signature header with
//! HMAC-SHA256 over `"{t}.{payload}"` before any payload is parsed or any
//! state is touched. An invalid signature is fatal for the request; the
//! provider retries delivery on its own schedule.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's webhook signature
pub const SIGNATURE_HEADER: &str = "provider-signature";

/// Maximum age of a signed payload before it is rejected
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

// =============================================================================
// Wire types
// =============================================================================

/// Envelope of a provider webhook delivery
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: Option<i64>,
    pub data: ProviderEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEventData {
    pub object: serde_json::Value,
}

/// Recognized provider event kinds; everything else is acknowledged and
/// logged without processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    TrialWillEnd,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    Unknown,
}

impl ProviderEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self.event_type.as_str() {
            "customer.subscription.created" => ProviderEventKind::SubscriptionCreated,
            "customer.subscription.updated" => ProviderEventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => ProviderEventKind::SubscriptionDeleted,
            "customer.subscription.trial_will_end" => ProviderEventKind::TrialWillEnd,
            "invoice.payment_succeeded" => ProviderEventKind::InvoicePaymentSucceeded,
            "invoice.payment_failed" => ProviderEventKind::InvoicePaymentFailed,
            _ => ProviderEventKind::Unknown,
        }
    }

    /// Extract the subscription object carried by a subscription event
    pub fn subscription(&self) -> BillingResult<ProviderSubscription> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            BillingError::WebhookEventNotSupported(format!(
                "expected subscription object: {}",
                e
            ))
        })
    }

    /// Extract the invoice object carried by an invoice event
    pub fn invoice(&self) -> BillingResult<ProviderInvoice> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            BillingError::WebhookEventNotSupported(format!("expected invoice object: {}", e))
        })
    }
}

/// Provider-side subscription object
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,
    /// Billing email of the provider customer; used to resolve the local user
    pub customer_email: Option<String>,
    pub status: String,
    /// Product identifier mapped onto a local plan id
    pub product: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub trial_end: Option<i64>,
}

/// Provider-side invoice object
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInvoice {
    pub id: String,
    pub customer: String,
    pub customer_email: Option<String>,
    pub subscription: Option<String>,
    pub amount_due: Option<i64>,
    pub amount_paid: Option<i64>,
}

// =============================================================================
// Signature verification
// =============================================================================

/// Verifier for inbound webhook deliveries
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Read the signing secret from `PROVIDER_WEBHOOK_SECRET`
    pub fn from_env() -> BillingResult<Self> {
        let secret = std::env::var("PROVIDER_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("PROVIDER_WEBHOOK_SECRET not set".to_string()))?;
        Ok(Self::new(secret))
    }

    /// Verify the signature header and parse the payload into a typed event
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<ProviderEvent> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| {
                tracing::error!("System time error: {}", e);
                BillingError::WebhookSignatureInvalid
            })?
            .as_secs() as i64;

        self.verify_event_at(payload, signature, now)
    }

    /// Verification against an explicit clock; `verify_event` supplies the
    /// system time.
    fn verify_event_at(
        &self,
        payload: &str,
        signature: &str,
        now: i64,
    ) -> BillingResult<ProviderEvent> {
        // Parse the signature header: t=timestamp,v1=signature
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::warn!("Missing v1 signature in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        if (now - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                diff = (now - timestamp).abs(),
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        // The secret may carry the provider's "whsec_" prefix
        let secret_key = self.secret.strip_prefix("whsec_").unwrap_or(&self.secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison of the hex digests
        if !constant_time_eq(computed.as_bytes(), v1_signature.as_bytes()) {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: ProviderEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.event_type,
            event_id = %event.id,
            "Webhook event verified"
        );

        Ok(event)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str, timestamp: i64) -> String {
        let secret_key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={},v1={}", timestamp, sig)
    }

    fn sample_event() -> String {
        serde_json::json!({
            "id": "evt_123",
            "type": "customer.subscription.updated",
            "created": 1704067200,
            "data": {
                "object": {
                    "id": "sub_123",
                    "customer": "cus_123",
                    "customer_email": "owner@example.com",
                    "status": "active",
                    "product": "prod_professional",
                    "current_period_start": 1704067200,
                    "current_period_end": 1706745600
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_valid_signature_parses_event() {
        let verifier = WebhookVerifier::new(SECRET);
        let payload = sample_event();
        let ts = 1704067200;

        let event = verifier
            .verify_event_at(&payload, &sign(&payload, ts), ts + 10)
            .unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.kind(), ProviderEventKind::SubscriptionUpdated);

        let sub = event.subscription().unwrap();
        assert_eq!(sub.customer, "cus_123");
        assert_eq!(sub.status, "active");
        assert_eq!(sub.product.as_deref(), Some("prod_professional"));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let verifier = WebhookVerifier::new(SECRET);
        let payload = sample_event();
        let ts = 1704067200;
        let signature = sign(&payload, ts);

        let tampered = payload.replace("active", "canceled");
        let err = verifier
            .verify_event_at(&tampered, &signature, ts + 10)
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let verifier = WebhookVerifier::new(SECRET);
        let payload = sample_event();
        let ts = 1704067200;

        let err = verifier
            .verify_event_at(&payload, &sign(&payload, ts), ts + 301)
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_missing_v1_rejected() {
        let verifier = WebhookVerifier::new(SECRET);
        let payload = sample_event();

        let err = verifier
            .verify_event_at(&payload, "t=1704067200", 1704067210)
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = WebhookVerifier::new("whsec_other_secret");
        let payload = sample_event();
        let ts = 1704067200;

        let err = verifier
            .verify_event_at(&payload, &sign(&payload, ts), ts)
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_event_kind_mapping() {
        let kinds = [
            ("customer.subscription.created", ProviderEventKind::SubscriptionCreated),
            ("customer.subscription.deleted", ProviderEventKind::SubscriptionDeleted),
            ("customer.subscription.trial_will_end", ProviderEventKind::TrialWillEnd),
            ("invoice.payment_succeeded", ProviderEventKind::InvoicePaymentSucceeded),
            ("invoice.payment_failed", ProviderEventKind::InvoicePaymentFailed),
            ("charge.refunded", ProviderEventKind::Unknown),
        ];
        for (name, expected) in kinds {
            let event = ProviderEvent {
                id: "evt_x".to_string(),
                event_type: name.to_string(),
                created: None,
                data: ProviderEventData {
                    object: serde_json::json!({}),
                },
            };
            assert_eq!(event.kind(), expected);
        }
    }
}
