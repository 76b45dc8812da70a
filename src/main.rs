use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;

use budget_engine::{app, config::Config, init_tracing, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment variables take precedence
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    let state = AppState::from_config(&config)?;

    let addr = SocketAddr::new(config.host, config.port);
    info!("Starting budget engine on {}", addr);
    info!(
        "Solver: tolerance {}, max {} iterations, {} scan segments",
        config.solver.tolerance, config.solver.max_iterations, config.solver.scan_segments
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections...");
}
