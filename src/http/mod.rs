//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! mux "http" protocol listener
//!     → server.rs (Axum router)
//!         ├─ GET /health  → 200
//!         ├─ GET /status  → StatusReport JSON
//!         └─ WebSocket upgrade → broker connection
//! ```

pub mod server;

pub use server::{HttpServer, PeerAddr, StatusReport};
