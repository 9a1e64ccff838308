//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use swiftfacture_billing::BillingService;

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub billing: Arc<BillingService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: PgPool, billing: BillingService, config: Config) -> Self {
        Self {
            pool,
            billing: Arc::new(billing),
            config: Arc::new(config),
        }
    }
}
