//! SwiftFacture API server entrypoint

use swiftfacture_api::{routes::create_router, AppState, Config};
use swiftfacture_billing::BillingService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let config = Config::from_env()?;

    let pool = swiftfacture_shared::create_pool(&config.database_url).await?;
    swiftfacture_shared::run_migrations(&pool).await?;

    let billing = BillingService::from_env(pool.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize billing service: {}", e))?;

    let state = AppState::new(pool, billing, config.clone());
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(bind_address = %config.bind_address, "SwiftFacture API listening");

    axum::serve(listener, router).await?;

    Ok(())
}
