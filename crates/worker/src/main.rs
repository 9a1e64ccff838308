//! SwiftFacture background worker
//!
//! Runs the time-triggered billing sweeps on a cron schedule:
//! - trial expiry sweep, hourly
//! - trial-ending reminder sweep, daily

mod sweeps;

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};

use swiftfacture_billing::BillingService;

/// Hourly, at minute 7
const TRIAL_EXPIRY_SCHEDULE: &str = "0 7 * * * *";
/// Daily at 09:23 UTC, after most provider overnight batches have settled
const REMINDER_SCHEDULE: &str = "0 23 9 * * *";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = swiftfacture_shared::create_pool(&database_url).await?;

    let billing = Arc::new(
        BillingService::from_env(pool)
            .map_err(|e| anyhow::anyhow!("Failed to initialize billing service: {}", e))?,
    );

    let scheduler = JobScheduler::new().await?;

    let expiry_billing = billing.clone();
    scheduler
        .add(Job::new_async(TRIAL_EXPIRY_SCHEDULE, move |_id, _lock| {
            let billing = expiry_billing.clone();
            Box::pin(async move {
                if let Err(e) = sweeps::run_trial_expiry_sweep(billing).await {
                    tracing::error!(error = %e, "Trial expiry sweep failed");
                }
            })
        })?)
        .await?;

    let reminder_billing = billing.clone();
    scheduler
        .add(Job::new_async(REMINDER_SCHEDULE, move |_id, _lock| {
            let billing = reminder_billing.clone();
            Box::pin(async move {
                if let Err(e) = sweeps::run_reminder_sweep(billing).await {
                    tracing::error!(error = %e, "Reminder sweep failed");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!(
        trial_expiry_schedule = TRIAL_EXPIRY_SCHEDULE,
        reminder_schedule = REMINDER_SCHEDULE,
        "SwiftFacture worker started"
    );

    // Run once at startup so a long-stopped worker catches up immediately
    if let Err(e) = sweeps::run_trial_expiry_sweep(billing.clone()).await {
        tracing::error!(error = %e, "Startup trial expiry sweep failed");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down worker");

    Ok(())
}
