//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BrokerConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::BrokerConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check the configuration for values that would break the broker at runtime.
pub fn validate_config(config: &BrokerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.queue_capacity == 0 {
        errors.push(ValidationError::new("listener.queue_capacity", "must be greater than 0"));
    }
    if config.listener.max_sniff_bytes == 0 {
        errors.push(ValidationError::new("listener.max_sniff_bytes", "must be greater than 0"));
    }
    if config.listener.accept_backoff_base_ms > config.listener.accept_backoff_max_ms {
        errors.push(ValidationError::new(
            "listener.accept_backoff_base_ms",
            "must not exceed accept_backoff_max_ms",
        ));
    }
    if config.connection.inactivity_secs == 0 {
        errors.push(ValidationError::new("connection.inactivity_secs", "must be greater than 0"));
    }
    if config.connection.max_frame_bytes == 0 {
        errors.push(ValidationError::new("connection.max_frame_bytes", "must be greater than 0"));
    }
    if config.connection.outbox_capacity == 0 {
        errors.push(ValidationError::new("connection.outbox_capacity", "must be greater than 0"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&BrokerConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = BrokerConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.listener.queue_capacity = 0;
        config.connection.outbox_capacity = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.queue_capacity",
                "connection.outbox_capacity"
            ]
        );
    }
}
