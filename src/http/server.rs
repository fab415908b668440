//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router: health, status, WebSocket upgrade
//! - Serve it on the mux's HTTP protocol listener
//! - Hand upgraded sockets to the broker
//!
//! Requests that are neither a known route nor a WebSocket upgrade get 404.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        connect_info::Connected,
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    serve::IncomingStream,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::broker::{Service, WsTransport};
use crate::net::ProtocolListener;

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub connections: u64,
    pub topics: usize,
    pub uptime_secs: u64,
}

/// Remote address of an HTTP connection accepted from the mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, ProtocolListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, ProtocolListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

/// HTTP and WebSocket front of the broker.
pub struct HttpServer {
    router: Router,
    service: Arc<Service>,
}

impl HttpServer {
    pub fn new(service: Arc<Service>) -> Self {
        let router = Self::build_router(Arc::clone(&service));
        Self { router, service }
    }

    fn build_router(service: Arc<Service>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/status", get(status))
            .fallback(upgrade)
            .with_state(service)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the broker shuts down.
    pub async fn run(self, listener: ProtocolListener) -> Result<(), std::io::Error> {
        tracing::info!(
            address = %listener.local_addr(),
            protocol = listener.protocol(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<PeerAddr>();
        let mut signal = self.service.shutdown().subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.recv().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn status(State(service): State<Arc<Service>>) -> Json<StatusReport> {
    Json(StatusReport {
        connections: service.connection_count(),
        topics: service.subscriptions().len(),
        uptime_secs: service.uptime().as_secs(),
    })
}

async fn upgrade(
    State(service): State<Arc<Service>>,
    ConnectInfo(PeerAddr(peer_addr)): ConnectInfo<PeerAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let max_frame_bytes = service.config().connection.max_frame_bytes;
    tracing::debug!(peer_addr = %peer_addr, "WebSocket upgrade");

    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| async move {
            service.on_accept_conn(WsTransport::new(socket, max_frame_bytes), peer_addr);
        })
        .into_response()
}
