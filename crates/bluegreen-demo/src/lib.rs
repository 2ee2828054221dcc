//! bluegreen-demo — the service that blue/green releases are exercised with.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Greeting with version, environment and hostname |
//! | GET | `/health` | Liveness, always `healthy` |
//! | GET | `/ready` | Readiness, always `ready` |
//! | GET | `/api/info` | Application metadata and uptime |
//! | GET | `/error` | Always 500 |

pub mod config;
pub mod routes;

use std::future::Future;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::info;

pub use config::{DemoConfig, LogFormat};
pub use routes::AppState;

/// Build the demo router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/api/info", get(routes::info))
        .route("/error", get(routes::error))
        .fallback(routes::not_found)
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, then drain connections.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let environment = state.config.environment.clone();
    info!(addr = ?listener.local_addr().ok(), %environment, "demo service listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!(%environment, "demo service stopped");
    Ok(())
}
