//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the BOSH gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Session policy: defaults, caps and floors applied at negotiation.
    pub bosh: BoshConfig,

    /// Inactivity sweep settings.
    pub sweep: SweepConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Where inbound packets go.
    pub routing: RoutingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5280").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5280".to_string(),
        }
    }
}

/// Server-side session policy.
///
/// `max_wait_secs` is a cap and `hold_requests` a floor for what clients may
/// negotiate; the remaining values are imposed as-is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BoshConfig {
    /// HTTP path the binding is served on.
    pub path: String,

    /// Routing domain used when the client does not name one.
    pub default_domain: String,

    pub max_wait_secs: u64,
    pub min_polling_secs: u64,
    pub max_inactivity_secs: u64,
    pub concurrent_requests: usize,
    pub hold_requests: usize,
    pub max_pause_secs: u64,

    /// How many already-answered request ids may be retransmitted.
    pub retransmission_window: u64,
}

impl Default for BoshConfig {
    fn default() -> Self {
        Self {
            path: "/http-bind".to_string(),
            default_domain: "localhost".to_string(),
            max_wait_secs: 30,
            min_polling_secs: 10,
            max_inactivity_secs: 10,
            concurrent_requests: 2,
            hold_requests: 1,
            max_pause_secs: 120,
            retransmission_window: 1,
        }
    }
}

/// Inactivity sweep configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Interval between sweeps in milliseconds.
    pub interval_ms: u64,
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Hard limit for one HTTP request/response in seconds.
    /// Must exceed `bosh.max_wait_secs`, or held responses get cut off.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 90 }
    }
}

/// Packet routing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Send every inbound packet straight back to its session.
    Echo,
    /// Log and drop inbound packets.
    #[default]
    Discard,
}

/// Routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RoutingConfig {
    pub mode: RoutingMode,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Request hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 256 * 1024, // 256KB
        }
    }
}
