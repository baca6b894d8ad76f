//! pool_stage - connection pool load campaigns
//!
//! HTTP server that accepts campaign descriptions and runs each one in the
//! background. Results are reported through the logs.

use std::net::SocketAddr;
use std::sync::Arc;

use pool_stage::api::{self, AppState};
use pool_stage::config::StoreBackend;
use pool_stage::repository::{InMemoryRepositoryFactory, PgStoreRepositoryFactory};
use pool_stage::{telemetry, Config, RepositoryFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    telemetry::init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let factory: Arc<dyn RepositoryFactory> = match config.store_backend {
        StoreBackend::Postgres => Arc::new(PgStoreRepositoryFactory),
        StoreBackend::Memory => Arc::new(InMemoryRepositoryFactory::new()),
    };

    tracing::info!(backend = ?config.store_backend, "Starting pool_stage server");

    let app = api::build_router(AppState::new(factory), &config.base_path);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}{}", addr, config.base_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
