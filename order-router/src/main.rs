//! order-router - public entry point
//!
//! Forwards every request to a healthy order-server instance, probing the
//! instances in the background and failing over on transient errors.

use std::net::SocketAddr;
use std::sync::Arc;

use order_router::{
    Dispatcher, HttpUpstreamClient, Prober, RouterConfig, RouterState, UpstreamClient,
    UpstreamPool, create_router,
};
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
                .unwrap_or_else(|_| "order_router=info,tower_http=info".into()),
        )
        .init();

    let config = RouterConfig::from_env()?;

    tracing::info!(
        instances = config.upstreams.len(),
        max_attempts = config.retry.max_attempts,
        "Starting order-router (env: {})",
        config.environment
    );
    for upstream in &config.upstreams {
        tracing::info!(name = %upstream.name, url = %upstream.base_url, "Upstream configured");
    }

    let pool = Arc::new(UpstreamPool::new(config.upstreams.clone()));
    let client: Arc<dyn UpstreamClient> = Arc::new(HttpUpstreamClient::new()?);
    let shutdown = CancellationToken::new();

    let prober = Prober::new(pool.clone(), client.clone(), config.probe.clone());
    let prober_handle = tokio::spawn(prober.run(shutdown.clone()));

    let dispatcher = Arc::new(Dispatcher::new(pool, client, config.retry.clone()));
    let app = create_router(RouterState { dispatcher });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("order-router listening on {addr}");

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
    prober_handle.await?;

    Ok(())
}
