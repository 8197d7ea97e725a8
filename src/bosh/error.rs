//! Session-layer error types.

use thiserror::Error;

/// Errors surfaced by the session layer.
///
/// Each variant maps to a protocol condition reported back to the client;
/// see [`BoshError::condition`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoshError {
    /// The request id skipped ahead of the next expected value.
    #[error("request {got} arrived out of order (expected {expected})")]
    OutOfOrderRequest { expected: u64, got: u64 },

    /// The request id replays an already acknowledged request.
    /// Fatal to the session.
    #[error("request {got} replays acknowledged traffic (last accepted {last_accepted})")]
    OverActivity { got: u64, last_accepted: u64 },

    /// Unknown, expired or terminated session identifier.
    #[error("session {0} not found")]
    SessionNotFound(String),

    /// A request against an established session carried no request id.
    #[error("request id missing")]
    MissingRequestId,

    /// Client asked to pause for longer than the negotiated maximum.
    #[error("pause of {requested}s exceeds the maximum of {max}s")]
    PauseTooLong { requested: u64, max: u64 },

    /// The request could not be interpreted.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl BoshError {
    /// Protocol condition name sent to the client.
    pub fn condition(&self) -> &'static str {
        match self {
            BoshError::SessionNotFound(_) => "item-not-found",
            BoshError::OverActivity { .. } | BoshError::PauseTooLong { .. } => "policy-violation",
            BoshError::OutOfOrderRequest { .. }
            | BoshError::MissingRequestId
            | BoshError::BadRequest(_) => "bad-request",
        }
    }

    /// Whether the error ends the session it was raised against.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BoshError::OverActivity { .. } | BoshError::SessionNotFound(_)
        )
    }
}

/// Result type for session-layer operations.
pub type BoshResult<T> = Result<T, BoshError>;

/// Negotiation input problems. Always absorbed by the negotiator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("malformed {name} parameter: {value:?}")]
    MalformedParameter { name: &'static str, value: String },
}
