//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (root accept loop, one dispatch task per connection)
//!     → sniff.rs + matcher.rs (peek first bytes, first match wins)
//!     → protocol.rs (bounded per-protocol queue, listener-shaped accept)
//!     → Hand off to HTTP/WebSocket or raw TCP server
//!
//! Per-connection states:
//!     Accepted → Sniffing → Matched(protocol) | Unmatched (closed)
//! ```
//!
//! # Design Decisions
//! - The accept loop never waits on a matcher or a full queue
//! - Sniffed bytes are replayed to the winning protocol, never lost
//! - Shutdown always wins over a pending handoff
//! - Queue capacity is the per-protocol backpressure knob

pub mod connection;
pub mod error;
pub mod listener;
pub mod matcher;
pub mod protocol;
pub mod sniff;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use error::MuxError;
pub use listener::{ErrorHandler, MuxHandle, MuxListener};
pub use matcher::{Decision, Matcher};
pub use protocol::{MuxConn, ProtocolListener};
pub use sniff::SniffBuffer;
