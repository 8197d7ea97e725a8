//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (caps > 0, addresses parse)
//! - Check timers agree with each other (sweep vs inactivity, request timeout vs wait)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{field} is not a valid socket address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("bosh.path must start with '/': {0:?}")]
    InvalidPath(String),

    #[error("timeouts.request_secs ({request_secs}) must exceed bosh.max_wait_secs ({max_wait_secs})")]
    RequestTimeoutTooShort { request_secs: u64, max_wait_secs: u64 },

    #[error("sweep.interval_ms ({interval_ms}) must be shorter than bosh.max_inactivity_secs ({max_inactivity_secs}s)")]
    SweepTooSlow { interval_ms: u64, max_inactivity_secs: u64 },
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let bosh = &config.bosh;

    if bosh.max_wait_secs == 0 {
        errors.push(ValidationError::Zero("bosh.max_wait_secs"));
    }
    if bosh.max_inactivity_secs == 0 {
        errors.push(ValidationError::Zero("bosh.max_inactivity_secs"));
    }
    if bosh.concurrent_requests == 0 {
        errors.push(ValidationError::Zero("bosh.concurrent_requests"));
    }
    if config.sweep.interval_ms == 0 {
        errors.push(ValidationError::Zero("sweep.interval_ms"));
    }
    if !bosh.path.starts_with('/') {
        errors.push(ValidationError::InvalidPath(bosh.path.clone()));
    }

    if config.timeouts.request_secs <= bosh.max_wait_secs {
        errors.push(ValidationError::RequestTimeoutTooShort {
            request_secs: config.timeouts.request_secs,
            max_wait_secs: bosh.max_wait_secs,
        });
    }

    if bosh.max_inactivity_secs > 0
        && config.sweep.interval_ms >= bosh.max_inactivity_secs.saturating_mul(1000)
    {
        errors.push(ValidationError::SweepTooSlow {
            interval_ms: config.sweep.interval_ms,
            max_inactivity_secs: bosh.max_inactivity_secs,
        });
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
