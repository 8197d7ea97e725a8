//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bosh_requests_total` (counter): HTTP requests by outcome
//! - `bosh_sessions_created_total` (counter)
//! - `bosh_sessions_terminated_total` (counter): by termination reason
//! - `bosh_sessions_active` (gauge)
//! - `bosh_slots_released_total` (counter): held responses by release kind
//! - `bosh_hold_duration_seconds` (histogram): time a response was held
//! - `bosh_open_connections` (gauge): physical connections in flight
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Metric names.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "bosh_requests_total";
    pub const SESSIONS_CREATED_TOTAL: &str = "bosh_sessions_created_total";
    pub const SESSIONS_TERMINATED_TOTAL: &str = "bosh_sessions_terminated_total";
    pub const SESSIONS_ACTIVE: &str = "bosh_sessions_active";
    pub const SLOTS_RELEASED_TOTAL: &str = "bosh_slots_released_total";
    pub const HOLD_DURATION_SECONDS: &str = "bosh_hold_duration_seconds";
    pub const OPEN_CONNECTIONS: &str = "bosh_open_connections";
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// One HTTP request finished with `outcome`.
pub fn record_request(outcome: &'static str) {
    ::metrics::counter!(names::REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_session_created() {
    ::metrics::counter!(names::SESSIONS_CREATED_TOTAL).increment(1);
}

pub fn record_session_terminated(reason: &'static str) {
    ::metrics::counter!(names::SESSIONS_TERMINATED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_active_sessions(count: usize) {
    ::metrics::gauge!(names::SESSIONS_ACTIVE).set(count as f64);
}

/// A held response was answered after `held`.
pub fn record_slot_released(kind: &'static str, held: Duration) {
    ::metrics::counter!(names::SLOTS_RELEASED_TOTAL, "kind" => kind).increment(1);
    ::metrics::histogram!(names::HOLD_DURATION_SECONDS).record(held.as_secs_f64());
}

pub fn record_open_connections(count: u64) {
    ::metrics::gauge!(names::OPEN_CONNECTIONS).set(count as f64);
}
