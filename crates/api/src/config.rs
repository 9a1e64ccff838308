//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database
    pub database_url: String,

    // Payment provider
    pub provider_webhook_secret: String,

    // Email
    pub resend_api_key: String,
    pub email_from: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// DATABASE_URL and PROVIDER_WEBHOOK_SECRET are required; everything else
    /// has a development default.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "https://app.swiftfacture.app".to_string()),
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            provider_webhook_secret: env::var("PROVIDER_WEBHOOK_SECRET")
                .map_err(|_| anyhow::anyhow!("PROVIDER_WEBHOOK_SECRET must be set"))?,
            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "SwiftFacture <noreply@swiftfacture.app>".to_string()),
        })
    }
}
