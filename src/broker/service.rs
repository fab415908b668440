//! The broker service.
//!
//! # Responsibilities
//! - Own the process-wide subscription registry and open-connection gauge
//! - Accept connections from any transport and run them to completion
//! - Put the HTTP/WebSocket and raw TCP servers behind one mux listener
//!
//! # Data Flow
//! ```text
//! MuxListener
//!     ├─ http("http") → HttpServer  (/health, /status, WebSocket upgrade)
//!     └─ any("tcp")   → tcp::serve  (length-delimited frames)
//!                          │
//!                          ▼
//!                 Service::on_accept_conn → Conn::process
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broker::conn::{Conn, ConnHandle};
use crate::broker::counters::Counters;
use crate::broker::message::{Frame, Ssid};
use crate::broker::observer::TopicObserver;
use crate::broker::tcp;
use crate::broker::transport::Transport;
use crate::config::{BrokerConfig, ConfigError};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::{matcher, ConnectionTracker, MuxError, MuxListener};
use crate::observability::{metrics, panics};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that stop the service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("listener error: {0}")]
    Mux(#[from] MuxError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Shared broker state.
pub struct Service {
    config: BrokerConfig,
    connections: ConnectionTracker,
    subscriptions: Counters,
    observer: Arc<dyn TopicObserver>,
    shutdown: Shutdown,
    started_at: Instant,
}

impl Service {
    pub fn new(config: BrokerConfig, observer: Arc<dyn TopicObserver>) -> Arc<Self> {
        panics::install_hook();
        Arc::new(Self {
            config,
            connections: ConnectionTracker::new(),
            subscriptions: Counters::new(),
            observer,
            shutdown: Shutdown::new(),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Number of open application connections.
    pub fn connection_count(&self) -> u64 {
        self.connections.active_count()
    }

    /// Topics with at least one subscriber across all connections.
    pub fn subscriptions(&self) -> &Counters {
        &self.subscriptions
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Stop the listeners and close every connection.
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    pub(crate) fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    /// Start processing a connection whose protocol has been resolved.
    pub fn on_accept_conn<T: Transport>(self: &Arc<Self>, transport: T, peer_addr: SocketAddr) -> ConnHandle {
        let conn = Conn::new(Arc::clone(self), transport, peer_addr);
        let handle = conn.handle().clone();
        tokio::spawn(conn.process());
        handle
    }

    /// Count a connection's subscription, reporting the topic's first subscriber.
    pub fn subscribe(&self, conn: &ConnHandle, ssid: &Ssid, channel: &str) {
        if self.subscriptions.increment(ssid, channel) {
            self.observer.on_subscribe(conn, ssid, channel);
            metrics::set_active_topics(self.subscriptions.len());
        }
    }

    /// Release a connection's subscription, reporting the topic's last subscriber.
    pub fn unsubscribe(&self, conn: &ConnHandle, ssid: &Ssid, channel: &str) {
        if self.subscriptions.decrement(ssid) {
            self.observer.on_unsubscribe(conn, ssid, channel);
            metrics::set_active_topics(self.subscriptions.len());
        }
    }

    pub fn publish(&self, conn: &ConnHandle, frame: &Frame) {
        self.observer.on_publish(conn, frame);
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn listen(self: Arc<Self>) -> Result<(), ServiceError> {
        let mux = MuxListener::bind(&self.config.listener).await?;
        self.serve(mux).await
    }

    /// Serve HTTP/WebSocket and raw TCP clients on `mux` until shutdown or
    /// until the mux stops on an error.
    pub async fn serve(self: Arc<Self>, mut mux: MuxListener) -> Result<(), ServiceError> {
        let http = mux.matcher(matcher::http("http"));
        let raw = mux.matcher(matcher::any("tcp"));
        mux.close_on(&self.shutdown);

        let http_task = tokio::spawn(HttpServer::new(Arc::clone(&self)).run(http));
        let tcp_task = tokio::spawn(tcp::serve(Arc::clone(&self), raw));

        let result = mux.serve().await;
        self.shutdown.trigger();

        match http_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
            Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
        }
        if let Err(e) = tcp_task.await {
            tracing::error!(error = %e, "TCP server task failed");
        }

        if tokio::time::timeout(DRAIN_TIMEOUT, self.connections.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.connection_count(),
                "Connections still open after drain timeout"
            );
        }

        tracing::info!("Broker stopped");
        Ok(result?)
    }
}
