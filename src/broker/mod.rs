//! Broker core.
//!
//! # Data Flow
//! ```text
//! Transport (WebSocket | length-delimited TCP)
//!     → conn.rs (decode Packet, per-connection subscriptions)
//!     → service.rs (process-wide Counters, first/last edges)
//!     → observer.rs (TopicObserver fan-out hook)
//!
//! ConnHandle::send(Frame) → outbox → conn.rs → encode → Transport
//! ```

pub mod conn;
pub mod counters;
pub mod message;
pub mod observer;
pub mod service;
pub mod tcp;
pub mod transport;

pub use conn::{Conn, ConnError, ConnHandle};
pub use counters::{Counter, Counters};
pub use message::{CodecError, Frame, Message, Packet, Ssid};
pub use observer::{LoggingObserver, TopicObserver};
pub use service::{Service, ServiceError};
pub use transport::{FramedTransport, Transport, WsTransport};
