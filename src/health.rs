//! Health/readiness HTTP server (spec §4.K): `/health`, `/healthz`,
//! `/ready`, `/` all return 200 once the owning ingester has called
//! `set_healthy(true)`, and 503 before that (or after a fatal error
//! flips it back). The server auto-selects the first free port in a
//! configured range so multiple ingesters can run on one host.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, IngestResult};

#[derive(Clone)]
pub struct HealthState {
    healthy: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self { healthy: Arc::new(AtomicBool::new(false)) }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

async fn health_handler(
    axum::extract::State(state): axum::extract::State<HealthState>,
) -> axum::http::StatusCode {
    if state.is_healthy() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    }
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(health_handler))
        .with_state(state)
}

/// Bind the first free port in `[start, end]`, returning the bound
/// port alongside the listener.
async fn bind_in_range(host: &str, start: u16, end: u16) -> IngestResult<(TcpListener, u16)> {
    for port in start..=end {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| IngestError::Permanent(format!("invalid health bind address: {e}")))?;
        if let Ok(listener) = TcpListener::bind(addr).await {
            return Ok((listener, port));
        }
    }
    Err(IngestError::Permanent(format!(
        "no free port in range {start}-{end}"
    )))
}

/// Starts the health server and returns its bound port; the server
/// runs until `cancel` fires.
pub async fn spawn(
    state: HealthState,
    host: &str,
    port_range: (u16, u16),
    cancel: CancellationToken,
) -> IngestResult<u16> {
    let (listener, port) = bind_in_range(host, port_range.0, port_range.1).await?;
    let app = router(state);

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel.cancelled().await;
        });
        if let Err(err) = server.await {
            tracing::error!(error = %err, "health server exited with error");
        }
    });

    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unhealthy() {
        let state = HealthState::new();
        assert!(!state.is_healthy());
    }

    #[test]
    fn reflects_set_healthy() {
        let state = HealthState::new();
        state.set_healthy(true);
        assert!(state.is_healthy());
        state.set_healthy(false);
        assert!(!state.is_healthy());
    }

    #[tokio::test]
    async fn binds_first_free_port_in_range() {
        let (_listener, port) = bind_in_range("127.0.0.1", 18080, 18090).await.unwrap();
        assert!((18080..=18090).contains(&port));
    }
}
