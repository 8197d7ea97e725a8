//! Session layer.
//!
//! Emulates a bidirectional stream over short-lived HTTP requests. Each
//! logical session owns negotiated parameters, an ordered outbound queue and
//! a set of held requests that are answered when data is available or their
//! wait expires.
//!
//! # Data Flow
//! ```text
//! HTTP request (decoded envelope)
//!     → manager.rs     (dispatch, routing of inbound payload)
//!     → registry.rs    (sid → Session)
//!     → session.rs     (state machine)
//!         ├─ sequencer.rs  (rid ordering, replays)
//!         ├─ params.rs     (wait/hold negotiation)
//!         └─ slot.rs       (held responses)
//!     → Reply → HTTP response
//! ```
//!
//! # Design Decisions
//! - Sessions are addressed by id through the registry, never by pointer
//!   from a connection
//! - Per-session mutual exclusion; sessions never block each other
//! - Time is `tokio::time::Instant` throughout

pub mod error;
pub mod manager;
pub mod packet;
pub mod params;
pub mod registry;
pub mod request;
pub mod sequencer;
pub mod session;
pub mod slot;

pub use error::{BoshError, BoshResult};
pub use manager::{Reply, SessionManager};
pub use packet::Packet;
pub use params::{Acknowledgment, ParameterNegotiator, SessionParams};
pub use registry::SessionRegistry;
pub use request::InboundRequest;
pub use session::{Session, SessionId, SessionState, TerminationReason};
pub use slot::{ConnectionSlot, PendingResponse, Release};
