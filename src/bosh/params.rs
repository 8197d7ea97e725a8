//! Session parameter negotiation.
//!
//! # Responsibilities
//! - Combine a client's requested `wait`/`hold`/`to` with server policy
//! - Apply the requested content type to the physical connection
//! - Produce the acknowledgment echoed in the session creation response
//!
//! # Design Decisions
//! - Never fails: malformed numbers fall back to the server value
//! - `wait` is capped, `hold` is floored, everything else is server-imposed
//! - Policy is read once per negotiation

use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

use crate::bosh::error::ParameterError;
use crate::bosh::request::{InboundRequest, HOLD_ATTR, WAIT_ATTR};
use crate::config::BoshConfig;
use crate::net::connection::Transport;

/// Effective parameters of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionParams {
    pub max_wait: u64,
    pub min_polling: u64,
    pub max_inactivity: u64,
    pub concurrent_requests: usize,
    pub hold_requests: usize,
    pub max_pause: u64,
}

impl SessionParams {
    /// Parameters straight from policy, before any client input.
    pub fn from_policy(policy: &BoshConfig) -> Self {
        Self {
            max_wait: policy.max_wait_secs,
            min_polling: policy.min_polling_secs,
            max_inactivity: policy.max_inactivity_secs,
            concurrent_requests: policy.concurrent_requests,
            hold_requests: policy.hold_requests,
            max_pause: policy.max_pause_secs,
        }
    }

    pub fn wait_duration(&self) -> Duration {
        Duration::from_secs(self.max_wait)
    }

    pub fn inactivity_duration(&self) -> Duration {
        Duration::from_secs(self.max_inactivity)
    }
}

/// Values echoed to the client on session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Acknowledgment {
    pub wait: u64,
    pub inactivity: u64,
    pub polling: u64,
    pub requests: usize,
}

impl Acknowledgment {
    /// Attribute name/value pairs in wire order.
    pub fn attributes(&self) -> [(&'static str, String); 4] {
        [
            ("wait", self.wait.to_string()),
            ("inactivity", self.inactivity.to_string()),
            ("polling", self.polling.to_string()),
            ("requests", self.requests.to_string()),
        ]
    }
}

/// Outcome of one negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub params: SessionParams,
    pub domain: String,
    pub content_type: Option<String>,
    pub ack: Acknowledgment,
}

/// Computes session parameters against a policy snapshot.
#[derive(Debug, Clone)]
pub struct ParameterNegotiator<'a> {
    policy: &'a BoshConfig,
}

impl<'a> ParameterNegotiator<'a> {
    pub fn new(policy: &'a BoshConfig) -> Self {
        Self { policy }
    }

    /// Negotiate parameters for `request`.
    ///
    /// `default_domain` is used when the client sends no `to`. A requested
    /// content type is applied to `transport` immediately.
    pub fn negotiate(
        &self,
        request: &InboundRequest,
        default_domain: &str,
        transport: &dyn Transport,
    ) -> Negotiation {
        let policy = self.policy;

        let max_wait = requested::<u64>(WAIT_ATTR, request.wait.as_deref())
            .map_or(policy.max_wait_secs, |wait| wait.min(policy.max_wait_secs));
        let hold_requests = requested::<usize>(HOLD_ATTR, request.hold.as_deref())
            .map_or(policy.hold_requests, |hold| hold.max(policy.hold_requests));

        let domain = request
            .to
            .clone()
            .unwrap_or_else(|| default_domain.to_string());

        if let Some(content_type) = request.content.as_deref() {
            transport.set_content_type(content_type);
        }

        let params = SessionParams {
            max_wait,
            hold_requests,
            ..SessionParams::from_policy(policy)
        };

        Negotiation {
            ack: Acknowledgment {
                wait: params.max_wait,
                inactivity: params.max_inactivity,
                polling: params.min_polling,
                requests: params.hold_requests,
            },
            params,
            domain,
            content_type: request.content.clone(),
        }
    }
}

/// Parse an optional numeric attribute, absorbing malformed input.
fn requested<T: FromStr>(name: &'static str, raw: Option<&str>) -> Option<T> {
    match parse_attr(name, raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring client value, using server policy");
            None
        }
    }
}

fn parse_attr<T: FromStr>(name: &'static str, raw: Option<&str>) -> Result<Option<T>, ParameterError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<T>()
            .map_err(|_| ParameterError::MalformedParameter {
                name,
                value: value.to_string(),
            })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionHandle;

    fn policy(max_wait: u64, hold: usize) -> BoshConfig {
        BoshConfig {
            max_wait_secs: max_wait,
            hold_requests: hold,
            ..BoshConfig::default()
        }
    }

    fn request(wait: Option<&str>, hold: Option<&str>) -> InboundRequest {
        InboundRequest {
            wait: wait.map(str::to_string),
            hold: hold.map(str::to_string),
            rid: Some(1),
            ..InboundRequest::default()
        }
    }

    fn negotiate(policy: &BoshConfig, request: &InboundRequest) -> Negotiation {
        ParameterNegotiator::new(policy).negotiate(request, "localhost", &ConnectionHandle::detached())
    }

    #[test]
    fn test_caps_wait_and_keeps_larger_hold() {
        let policy = policy(60, 1);
        let result = negotiate(&policy, &request(Some("120"), Some("5")));

        assert_eq!(result.params.max_wait, 60);
        assert_eq!(result.params.hold_requests, 5);
        assert_eq!(result.ack.wait, 60);
        assert_eq!(result.ack.requests, 5);
    }

    #[test]
    fn test_shorter_wait_is_honoured() {
        let policy = policy(60, 1);
        let result = negotiate(&policy, &request(Some("20"), None));
        assert_eq!(result.params.max_wait, 20);
    }

    #[test]
    fn test_wait_above_cap_always_capped() {
        let policy = policy(45, 1);
        for wait in [46u64, 100, 3600, u64::MAX] {
            let result = negotiate(&policy, &request(Some(&wait.to_string()), None));
            assert_eq!(result.params.max_wait, 45, "wait={wait}");
        }
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let policy = policy(30, 2);
        for garbage in ["", "abc", "-5", "1.5", "99999999999999999999999"] {
            let result = negotiate(&policy, &request(Some(garbage), Some(garbage)));
            assert_eq!(result.params.max_wait, 30, "wait={garbage:?}");
            assert_eq!(result.params.hold_requests, 2, "hold={garbage:?}");
        }
    }

    #[test]
    fn test_absent_values_use_policy() {
        let policy = policy(30, 2);
        let result = negotiate(&policy, &request(None, None));
        assert_eq!(result.params, SessionParams::from_policy(&policy));
    }

    #[test]
    fn test_hold_floor_and_monotonicity() {
        let policy = policy(30, 3);
        let mut previous = 0;
        for hold in 0..10usize {
            let result = negotiate(&policy, &request(None, Some(&hold.to_string())));
            assert!(result.params.hold_requests >= 3);
            assert!(result.params.hold_requests >= previous);
            previous = result.params.hold_requests;
        }
        let result = negotiate(&policy, &request(None, Some("1")));
        assert_eq!(result.params.hold_requests, 3);
    }

    #[test]
    fn test_server_controlled_values_ignore_client() {
        let policy = BoshConfig {
            min_polling_secs: 7,
            max_inactivity_secs: 11,
            concurrent_requests: 4,
            max_pause_secs: 99,
            ..BoshConfig::default()
        };
        let result = negotiate(&policy, &request(Some("1"), Some("9")));

        assert_eq!(result.params.min_polling, 7);
        assert_eq!(result.params.max_inactivity, 11);
        assert_eq!(result.params.concurrent_requests, 4);
        assert_eq!(result.params.max_pause, 99);
        assert_eq!(
            result.ack,
            Acknowledgment {
                wait: 1,
                inactivity: 11,
                polling: 7,
                requests: 9,
            }
        );
    }

    #[test]
    fn test_negotiation_is_idempotent() {
        let policy = policy(60, 1);
        let input = request(Some("25"), Some("2"));
        assert_eq!(negotiate(&policy, &input), negotiate(&policy, &input));
    }

    #[test]
    fn test_domain_and_content_type() {
        let policy = BoshConfig::default();
        let transport = ConnectionHandle::detached();
        let mut input = request(None, None);

        let result = ParameterNegotiator::new(&policy).negotiate(&input, "default.example", &transport);
        assert_eq!(result.domain, "default.example");
        assert_eq!(transport.content_type(), None);

        input.to = Some("chat.example".into());
        input.content = Some("text/xml; charset=utf-8".into());
        let result = ParameterNegotiator::new(&policy).negotiate(&input, "default.example", &transport);
        assert_eq!(result.domain, "chat.example");
        assert_eq!(result.content_type.as_deref(), Some("text/xml; charset=utf-8"));
        assert_eq!(transport.content_type().as_deref(), Some("text/xml; charset=utf-8"));
    }

    #[test]
    fn test_ack_attribute_order() {
        let ack = Acknowledgment {
            wait: 60,
            inactivity: 10,
            polling: 5,
            requests: 2,
        };
        let names: Vec<_> = ack.attributes().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["wait", "inactivity", "polling", "requests"]);
    }
}
