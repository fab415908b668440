//! Application connection lifecycle.
//!
//! # Responsibilities
//! - Run the per-connection loop: inbound packets, outbound frames,
//!   inactivity deadline, broker shutdown
//! - Keep the connection's own subscription set
//! - Release every subscription and the open-connection slot exactly once,
//!   whether the loop returns or panics

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::counters::Counters;
use crate::broker::message::{CodecError, Frame, Packet};
use crate::broker::service::Service;
use crate::broker::transport::Transport;
use crate::net::{ConnectionGuard, ConnectionId};
use crate::observability::{metrics, panics};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("no activity for {0:?}")]
    Timeout(Duration),
}

/// Cheap, cloneable reference to a live connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: ConnectionId,
    guid: Uuid,
    peer_addr: SocketAddr,
    outbox: mpsc::Sender<Frame>,
}

impl ConnHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Globally unique id, stable across restarts of the id counter.
    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue a frame for delivery. Returns `false` if the connection is gone
    /// or its outbox is full; the frame is dropped in both cases.
    pub fn send(&self, frame: Frame) -> bool {
        match self.outbox.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.id, "Outbox full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// A connection being processed by the broker.
pub struct Conn<T> {
    handle: ConnHandle,
    transport: T,
    outbox: mpsc::Receiver<Frame>,
    subs: Counters,
    service: Arc<Service>,
    guard: Option<ConnectionGuard>,
}

impl<T: Transport> Conn<T> {
    /// Wrap a transport and take an open-connection slot on `service`.
    pub fn new(service: Arc<Service>, transport: T, peer_addr: SocketAddr) -> Self {
        let guard = service.connections().track();
        let (tx, rx) = mpsc::channel(service.config().connection.outbox_capacity.max(1));
        let handle = ConnHandle {
            id: guard.id(),
            guid: Uuid::new_v4(),
            peer_addr,
            outbox: tx,
        };

        metrics::set_active_connections(service.connection_count());
        tracing::debug!(
            connection_id = %handle.id,
            guid = %handle.guid,
            peer_addr = %peer_addr,
            "Connection opened"
        );

        Self {
            handle,
            transport,
            outbox: rx,
            subs: Counters::new(),
            service,
            guard: Some(guard),
        }
    }

    pub fn handle(&self) -> &ConnHandle {
        &self.handle
    }

    /// Process the connection until it ends, then close it.
    pub async fn process(mut self) {
        let outcome = AssertUnwindSafe(self.run()).catch_unwind().await;
        let id = self.handle.id;

        match outcome {
            Ok(Ok(())) => tracing::debug!(connection_id = %id, "Connection finished"),
            Ok(Err(ConnError::Timeout(after))) => {
                tracing::debug!(connection_id = %id, idle = ?after, "Connection timed out")
            }
            Ok(Err(e)) => tracing::debug!(connection_id = %id, error = %e, "Connection failed"),
            Err(panic) => {
                let backtrace = panics::take_backtrace()
                    .map(|bt| bt.to_string())
                    .unwrap_or_else(|| "unavailable".to_string());
                tracing::error!(
                    connection_id = %id,
                    panic = panic_message(panic.as_ref()),
                    backtrace = %backtrace,
                    "Connection processing panicked"
                );
            }
        }

        self.close().await;
    }

    async fn run(&mut self) -> Result<(), ConnError> {
        let inactivity = self.service.config().connection.inactivity();
        let mut closing = self.service.shutdown().subscribe();

        loop {
            tokio::select! {
                _ = closing.recv() => {
                    tracing::debug!(connection_id = %self.handle.id, "Broker shutting down");
                    return Ok(());
                }
                inbound = self.transport.recv() => match inbound? {
                    Some(bytes) => self.on_frame(&bytes)?,
                    None => return Ok(()),
                },
                Some(frame) = self.outbox.recv() => self.write(frame).await?,
                _ = tokio::time::sleep(inactivity) => return Err(ConnError::Timeout(inactivity)),
            }
        }
    }

    fn on_frame(&self, bytes: &[u8]) -> Result<(), ConnError> {
        let packet = Packet::decode(bytes).inspect_err(|e| {
            metrics::record_decode_error();
            tracing::debug!(connection_id = %self.handle.id, error = %e, "Undecodable frame");
        })?;

        match packet {
            Packet::Subscribe { ssid, channel } => {
                if self.subs.increment(&ssid, &channel) {
                    self.service.subscribe(&self.handle, &ssid, &channel);
                }
            }
            Packet::Unsubscribe { ssid } => {
                let Some(counter) = self.subs.get(&ssid) else {
                    return Ok(());
                };
                if self.subs.decrement(&ssid) {
                    self.service.unsubscribe(&self.handle, &ssid, &counter.channel);
                }
            }
            Packet::Publish { mut messages } => {
                let now = unix_nanos();
                for message in &mut messages.0 {
                    if message.time == 0 {
                        message.time = now;
                    }
                }
                self.service.publish(&self.handle, &messages);
            }
        }
        Ok(())
    }

    async fn write(&mut self, frame: Frame) -> Result<(), ConnError> {
        let bytes = frame.encode()?;
        let limit = self.service.config().connection.max_frame_bytes;
        if bytes.len() > limit {
            tracing::warn!(
                connection_id = %self.handle.id,
                size = bytes.len(),
                limit,
                "Outbound frame too large, dropping"
            );
            return Ok(());
        }
        self.transport.send(bytes).await?;
        Ok(())
    }

    /// Release subscriptions, close the transport and free the
    /// open-connection slot. Runs once; later calls do nothing.
    async fn close(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };

        for counter in self.subs.all() {
            let released = std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.service
                    .unsubscribe(&self.handle, &counter.ssid, &counter.channel)
            }));
            if released.is_err() {
                let backtrace = panics::take_backtrace()
                    .map(|bt| bt.to_string())
                    .unwrap_or_else(|| "unavailable".to_string());
                tracing::error!(
                    connection_id = %self.handle.id,
                    ssid = %counter.ssid,
                    backtrace = %backtrace,
                    "Unsubscribe panicked during close"
                );
            }
        }

        if tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close())
            .await
            .is_err()
        {
            tracing::debug!(connection_id = %self.handle.id, "Transport close timed out");
        }

        drop(guard);
        metrics::set_active_connections(self.service.connection_count());
        tracing::debug!(connection_id = %self.handle.id, "Connection closed");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
