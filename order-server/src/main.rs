//! order-server - order API instance
//!
//! Long-running service that:
//! - Registers identities and issues, validates and revokes session tokens
//! - Enforces per-route quota tiers against the shared ledger
//! - Serves the order CRUD endpoints

use std::net::SocketAddr;
use std::time::Duration;

use order_server::sweeper::LedgerSweeper;
use order_server::{AppState, Config, api};
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_server=info,security=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        instance = %config.instance_id,
        "Starting order-server (env: {})",
        config.environment
    );

    let state = AppState::new(&config).await?;
    let shutdown = CancellationToken::new();

    // Periodic ledger sweep
    let sweeper = LedgerSweeper::new(
        state.ledger.clone(),
        Duration::from_secs(config.ledger_sweep_secs),
        shutdown.clone(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    let app = api::create_router(state);

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("order-server listening on {addr}");

    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = server_shutdown.cancelled() => {}
        }
    })
    .await?;

    tracing::info!("Shutting down");
    shutdown.cancel();
    sweeper_handle.await?;

    Ok(())
}
