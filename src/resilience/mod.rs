//! Resilience helpers.
//!
//! # Design Decisions
//! - Temporary accept failures back off exponentially with jitter
//! - The delay resets after the next successful accept

pub mod backoff;
