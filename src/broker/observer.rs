//! Hooks into topic fan-out.
//!
//! The broker reports topic liveness edges and inbound publishes through
//! [`TopicObserver`]; delivering publishes to subscribers is up to the
//! implementation, which can push frames back through a [`ConnHandle`].

use crate::broker::conn::ConnHandle;
use crate::broker::message::{Frame, Ssid};

/// Receives subscription edges and publishes.
pub trait TopicObserver: Send + Sync + 'static {
    /// `ssid` went from zero to one subscriber.
    fn on_subscribe(&self, conn: &ConnHandle, ssid: &Ssid, channel: &str);

    /// `ssid` lost its last subscriber.
    fn on_unsubscribe(&self, conn: &ConnHandle, ssid: &Ssid, channel: &str);

    /// A client published `frame`.
    fn on_publish(&self, conn: &ConnHandle, frame: &Frame) {
        let _ = (conn, frame);
    }
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl TopicObserver for LoggingObserver {
    fn on_subscribe(&self, conn: &ConnHandle, ssid: &Ssid, channel: &str) {
        tracing::debug!(connection_id = %conn.id(), guid = %conn.guid(), ssid = %ssid, channel, "Topic active");
    }

    fn on_unsubscribe(&self, conn: &ConnHandle, ssid: &Ssid, channel: &str) {
        tracing::debug!(connection_id = %conn.id(), guid = %conn.guid(), ssid = %ssid, channel, "Topic inactive");
    }

    fn on_publish(&self, conn: &ConnHandle, frame: &Frame) {
        tracing::trace!(connection_id = %conn.id(), guid = %conn.guid(), messages = frame.len(), "Publish received");
    }
}
