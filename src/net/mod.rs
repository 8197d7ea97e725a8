//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming HTTP request
//!     → ConnectionTracker::track (open-connection gauge)
//!     → ConnectionHandle (id, peer, response content type)
//!     → seen by the session layer only as `dyn Transport`
//! ```

pub mod connection;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionTracker, Transport};
