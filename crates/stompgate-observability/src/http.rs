//! Management HTTP endpoint.
//!
//! Serves `/healthz` (liveness), `/readyz` (readiness) and `/status` (a JSON
//! snapshot of the bridge state) on the management port.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::state::BridgeState;

/// Build the management router. Split from [`serve_monitoring`] so tests can
/// drive it without binding a socket.
pub fn monitoring_router(state: BridgeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve the management endpoint until the process exits.
pub async fn serve_monitoring(bind: &str, state: BridgeState) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = bind, "management endpoint listening");
    axum::serve(listener, monitoring_router(state)).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<BridgeState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "ready": false,
                "phase": state.phase(),
            })),
        )
    }
}

async fn status(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(state.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BridgePhase;

    #[tokio::test]
    async fn readyz_reflects_bridge_state() {
        let state = BridgeState::new();
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = monitoring_router(state.clone());
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            addr
        };

        let not_ready = reqwest_lite(&format!("http://{addr}/readyz")).await;
        assert_eq!(not_ready.0, 503);

        state.set_phase(BridgePhase::Serving);
        state.set_broker_connected(true);
        let ready = reqwest_lite(&format!("http://{addr}/readyz")).await;
        assert_eq!(ready.0, 200);

        let status = reqwest_lite(&format!("http://{addr}/status")).await;
        assert_eq!(status.0, 200);
        assert!(status.1.contains("\"phase\":\"serving\""));
    }

    /// Minimal HTTP GET over a raw TCP stream; enough for the tests and one
    /// less dev-dependency.
    async fn reqwest_lite(url: &str) -> (u16, String) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let rest = url.strip_prefix("http://").unwrap();
        let (addr, path) = rest.split_once('/').unwrap();
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                format!("GET /{path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        let status: u16 = response
            .split_whitespace()
            .nth(1)
            .unwrap()
            .parse()
            .unwrap();
        let body = response
            .split("\r\n\r\n")
            .nth(1)
            .unwrap_or_default()
            .to_string();
        (status, body)
    }
}
