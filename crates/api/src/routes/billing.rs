//! Billing endpoints: provider webhook, access check, trial start

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use swiftfacture_billing::{AccessDecision, DenialReason, SIGNATURE_HEADER};

/// Authenticated user id injected by the upstream gateway.
/// Authentication itself is an external collaborator; by the time a request
/// reaches this service the gateway has already verified the session.
fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(ApiError::Unauthorized)
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

// ============================================================================
// Webhook
// ============================================================================

/// Handle payment provider webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    tracing::info!(body_len = body.len(), "Provider webhook received");

    // Get signature header
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Provider webhook missing signature header");
            ApiError::BadRequest("Missing webhook signature".to_string())
        })?;

    // Verify and parse event; nothing is processed before this succeeds
    let event = state
        .billing
        .webhooks
        .verify_event(&body, signature)
        .map_err(|e| {
            tracing::warn!(error = ?e, "Provider webhook signature verification failed");
            ApiError::BadRequest("Invalid webhook signature".to_string())
        })?;

    // Handle the event
    state.billing.reconciler.handle_event(event).await.map_err(|e| {
        tracing::error!("Webhook handling error: {}", e);
        ApiError::from(e)
    })?;

    tracing::info!("Provider webhook processed successfully");

    Ok(StatusCode::OK)
}

// ============================================================================
// Access check
// ============================================================================

/// Response for GET /billing/access
#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_left: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Access check consulted by page-load guards.
///
/// A storage failure surfaces as 5xx, distinct from a legitimate "not
/// granted" decision, so the UI can tell "you're not subscribed" apart from
/// "we couldn't verify your subscription".
pub async fn check_access(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AccessResponse>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let now = OffsetDateTime::now_utc();

    let ctx = state.billing.access.load_context(user_id).await?;
    let decision = swiftfacture_billing::evaluate(&ctx, now);

    // The evaluator stays pure; persisting the overdue-trial transition is
    // the trial lifecycle manager's job, invoked here as a caller-side effect.
    if let AccessDecision::Denied {
        reason: DenialReason::TrialExpired,
    } = &decision
    {
        if let Some(subscription) = &ctx.subscription {
            if let Err(e) = state.billing.trial.expire_trial(subscription.id).await {
                tracing::error!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to persist trial expiry after access check"
                );
            }
        }
    }

    let response = match decision {
        AccessDecision::Granted { plan_id, trial } => AccessResponse {
            granted: true,
            plan_id: Some(plan_id),
            days_left: trial.as_ref().map(|t| t.days_left),
            trial_end: trial.as_ref().map(|t| rfc3339(t.trial_end)),
            reason: None,
        },
        AccessDecision::Denied { reason } => AccessResponse {
            granted: false,
            plan_id: None,
            days_left: None,
            trial_end: None,
            reason: Some(reason.to_string()),
        },
    };

    Ok(Json(response))
}

// ============================================================================
// Trial start
// ============================================================================

/// Request for POST /billing/trial
#[derive(Debug, Deserialize)]
pub struct StartTrialRequest {
    pub org_name: Option<String>,
}

/// Response for POST /billing/trial
#[derive(Debug, Serialize)]
pub struct StartTrialResponse {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub subscription_id: Uuid,
    pub plan_id: String,
    pub status: String,
    pub trial_end: Option<String>,
}

/// Start the 30-day trial for a freshly signed-up user
pub async fn start_trial(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartTrialRequest>,
) -> Result<(StatusCode, Json<StartTrialResponse>), ApiError> {
    let user_id = user_id_from_headers(&headers)?;

    let trial = state
        .billing
        .trial
        .start_trial(user_id, request.org_name.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(StartTrialResponse {
            organization_id: trial.organization.id,
            organization_name: trial.organization.name,
            subscription_id: trial.subscription.id,
            plan_id: trial.subscription.plan_id,
            status: trial.subscription.status,
            trial_end: trial.subscription.trial_end.map(rfc3339),
        }),
    ))
}
