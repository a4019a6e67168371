//! Local control API.
//!
//! Every route except `/healthz` requires the bearer token stored under the
//! data dir.

mod auth;
mod routes;

pub use auth::*;

use crate::error::Result;
use crate::orchestrator::Supervisor;
use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct ApiState {
    pub supervisor: Supervisor,
    pub token: AuthToken,
}

pub fn router(supervisor: Supervisor, token: AuthToken) -> Router {
    let state = ApiState { supervisor, token };

    let protected = Router::new()
        .route("/readyz", get(routes::readyz))
        .route("/ports", get(routes::ports))
        .route("/logs/tail", get(routes::logs_tail))
        .route("/shutdown", get(routes::shutdown).post(routes::shutdown))
        .route(
            "/secrets",
            get(routes::list_secrets).post(routes::submit_secrets),
        )
        .route("/telemetry", get(routes::telemetry))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/healthz", get(routes::healthz))
        .merge(protected)
        .with_state(state)
}

/// Bind the listener from the manifest's `ipc` block. Port `0` or none
/// picks an ephemeral port.
pub async fn bind(host: &str, port: Option<u16>) -> Result<TcpListener> {
    let listener = TcpListener::bind((host, port.unwrap_or(0))).await?;
    tracing::info!("Control API listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve until the supervisor has finished shutting down.
pub async fn serve(listener: TcpListener, supervisor: Supervisor, token: AuthToken) -> Result<()> {
    let done = supervisor.clone();
    axum::serve(listener, router(supervisor, token))
        .with_graceful_shutdown(async move { done.shutdown_complete().await })
        .await?;
    tracing::debug!("Control API closed");
    Ok(())
}
