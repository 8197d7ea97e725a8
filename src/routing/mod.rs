//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound payload (accepted request)
//!     → PacketRouter::submit(route, packets)
//!     → ChannelRouter → RoutedEvent::Inbound over mpsc
//!     → component (echo.rs) processes it
//!     → SessionRegistry::deliver(sid, replies)
//!     → held slot or outbound queue
//! ```
//!
//! # Design Decisions
//! - Submission never blocks; the channel is unbounded
//! - The session layer does not know what sits behind the router
//! - Stanza parsing belongs to the component, not to this crate

pub mod echo;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::bosh::packet::Packet;
use crate::bosh::session::SessionId;

pub use echo::{DiscardComponent, EchoComponent};

/// Addressing of a session's traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub sid: SessionId,
    pub domain: String,
}

impl Route {
    pub fn new(sid: SessionId, domain: impl Into<String>) -> Self {
        Self {
            sid,
            domain: domain.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("routing component for {domain} is unavailable")]
    Unavailable { domain: String },
}

/// Destination of inbound payloads.
pub trait PacketRouter: Send + Sync {
    /// Hand packets received from the client to the routing layer.
    fn submit(&self, route: &Route, packets: Vec<Packet>) -> Result<(), RouteError>;

    /// A session ended; release anything tied to it.
    fn session_closed(&self, _route: &Route) {}
}

/// Event carried from the session layer to a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedEvent {
    Inbound { route: Route, packets: Vec<Packet> },
    Closed { route: Route },
}

/// Router that forwards events to a component task.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    tx: mpsc::UnboundedSender<RoutedEvent>,
}

impl ChannelRouter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RoutedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PacketRouter for ChannelRouter {
    fn submit(&self, route: &Route, packets: Vec<Packet>) -> Result<(), RouteError> {
        tracing::trace!(session_id = %route.sid, count = packets.len(), "Routing inbound packets");
        self.tx
            .send(RoutedEvent::Inbound {
                route: route.clone(),
                packets,
            })
            .map_err(|_| RouteError::Unavailable {
                domain: route.domain.clone(),
            })
    }

    fn session_closed(&self, route: &Route) {
        let _ = self.tx.send(RoutedEvent::Closed {
            route: route.clone(),
        });
    }
}
