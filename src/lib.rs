//! Real-time messaging broker core.

pub mod broker;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use broker::Service;
pub use config::schema::BrokerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use net::MuxListener;
