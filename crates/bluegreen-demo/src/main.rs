//! demo-service — HTTP service deployed into the blue and green
//! environments.
//!
//! # Usage
//!
//! ```text
//! ENVIRONMENT=green APP_VERSION=v2 PORT=8082 demo-service
//! ```

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bluegreen_demo::{AppState, DemoConfig, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DemoConfig::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bluegreen_demo=debug"));
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        environment = %config.environment,
        version = %config.version,
        "demo service starting"
    );

    bluegreen_demo::serve(listener, AppState::new(config), shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix (what Kubernetes sends on pod
/// termination).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
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
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
