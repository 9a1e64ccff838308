//! Email notifications for the trial lifecycle
//!
//! Sends transactional emails via the Resend API. Delivery failures are
//! non-fatal: callers get `Ok(false)` and decide whether to retry on the next
//! sweep.

use crate::error::BillingResult;

/// Template key attached to every outbound reminder intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    Welcome,
    Reminder7,
    Reminder2,
    Reminder1,
    Expired,
}

impl EmailTemplate {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Reminder7 => "reminder7",
            Self::Reminder2 => "reminder2",
            Self::Reminder1 => "reminder1",
            Self::Expired => "expired",
        }
    }

    /// Reminder template for a days-before-expiry threshold
    pub fn for_days_left(days_left: i64) -> Option<Self> {
        match days_left {
            7 => Some(Self::Reminder7),
            2 => Some(Self::Reminder2),
            1 => Some(Self::Reminder1),
            _ => None,
        }
    }
}

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Support email
    pub support_email: String,
    /// Dashboard URL (also the upgrade destination)
    pub dashboard_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "SwiftFacture <noreply@swiftfacture.app>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "SwiftFacture".to_string()),
            support_email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@swiftfacture.app".to_string()),
            dashboard_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "https://app.swiftfacture.app".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Trial lifecycle email service
#[derive(Clone)]
pub struct ReminderEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl ReminderEmailService {
    /// Create a new email service
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Send an email via Resend API
    ///
    /// Returns `Ok(true)` if the email was sent successfully,
    /// `Ok(false)` if sending failed (non-fatal - doesn't propagate error),
    /// `Err` only for critical configuration issues.
    ///
    /// The `Ok(false)` return lets sweep callers track delivery status while
    /// never failing webhook or sweep processing over an email error.
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        #[allow(clippy::disallowed_methods)]
        // json! macro uses unwrap internally, safe for primitive types
        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Trial email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %status,
                    body = %body,
                    "Failed to send trial email - non-fatal"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    error = %e,
                    "Failed to send trial email - non-fatal"
                );
                Ok(false)
            }
        }
    }

    /// Send the welcome email at trial start
    pub async fn send_trial_welcome(
        &self,
        to: &str,
        org_name: &str,
        trial_end_date: &str,
    ) -> BillingResult<bool> {
        let dashboard_link = self.config.dashboard_url.clone();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #6366f1;">Welcome to {app_name}!</h2>
    <p>Hi there,</p>
    <p>Your workspace <strong>{org_name}</strong> is ready. Your 30-day free trial runs until <strong>{trial_end_date}</strong>.</p>
    <p>Create your first invoice, estimate or receipt in a couple of minutes:</p>
    <p>
        <a href="{dashboard_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Open Dashboard
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            app_name = self.config.app_name,
            org_name = org_name,
            trial_end_date = trial_end_date,
            dashboard_link = dashboard_link,
            support_email = self.config.support_email,
        );

        self.send_email(
            to,
            &format!("Welcome to {} - your trial has started", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send a trial ending reminder for one of the fixed thresholds
    pub async fn send_trial_reminder(
        &self,
        to: &str,
        org_name: &str,
        days_left: i64,
        trial_end_date: &str,
    ) -> BillingResult<bool> {
        let upgrade_link = format!("{}/billing", self.config.dashboard_url);
        let day_word = if days_left == 1 { "day" } else { "days" };

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #f59e0b;">Your trial ends in {days_left} {day_word}</h2>
    <p>Hi there,</p>
    <p>The free trial for <strong>{org_name}</strong> ends on <strong>{trial_end_date}</strong>.</p>
    <p>Pick a plan to keep your invoices, estimates and customer records available without interruption.</p>
    <p>
        <a href="{upgrade_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Choose a Plan
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            days_left = days_left,
            day_word = day_word,
            org_name = org_name,
            trial_end_date = trial_end_date,
            upgrade_link = upgrade_link,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!(
                "{} {} left in your {} trial",
                days_left, day_word, self.config.app_name
            ),
            &html,
        )
        .await
    }

    /// Send the trial expired notification
    pub async fn send_trial_expired(&self, to: &str, org_name: &str) -> BillingResult<bool> {
        let upgrade_link = format!("{}/billing", self.config.dashboard_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #dc2626;">Your trial has ended</h2>
    <p>Hi there,</p>
    <p>The free trial for <strong>{org_name}</strong> has ended. Your documents are safe, but creating and sending new ones is paused until you pick a plan.</p>
    <p>
        <a href="{upgrade_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Choose a Plan
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            org_name = org_name,
            upgrade_link = upgrade_link,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Your {} trial has ended", self.config.app_name),
            &html,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_keys() {
        assert_eq!(EmailTemplate::Welcome.key(), "welcome");
        assert_eq!(EmailTemplate::Reminder7.key(), "reminder7");
        assert_eq!(EmailTemplate::Reminder1.key(), "reminder1");
        assert_eq!(EmailTemplate::Expired.key(), "expired");
    }

    #[test]
    fn test_template_for_threshold() {
        assert_eq!(EmailTemplate::for_days_left(7), Some(EmailTemplate::Reminder7));
        assert_eq!(EmailTemplate::for_days_left(2), Some(EmailTemplate::Reminder2));
        assert_eq!(EmailTemplate::for_days_left(1), Some(EmailTemplate::Reminder1));
        assert_eq!(EmailTemplate::for_days_left(3), None);
    }

    #[test]
    fn test_email_disabled_without_api_key() {
        let config = EmailConfig {
            resend_api_key: String::new(),
            email_from: "x@y.z".to_string(),
            app_name: "SwiftFacture".to_string(),
            support_email: "s@y.z".to_string(),
            dashboard_url: "https://app.swiftfacture.app".to_string(),
        };
        assert!(!config.is_enabled());
    }
}
