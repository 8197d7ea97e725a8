//! Held responses.
//!
//! # Responsibilities
//! - Represent one physical connection's pending response within a session
//! - Race outbound data against the `max_wait` deadline
//!
//! # Data Flow
//! ```text
//! Session::handle_request
//!     → ConnectionSlot::open  ──(slot kept by the session)
//!     → PendingResponse       ──(returned to the HTTP handler)
//!
//! PendingResponse::wait
//!     ├─ Release arrives on the oneshot (data, eviction, termination)
//!     └─ deadline fires → Session::expire_slot → empty response
//! ```
//!
//! # Design Decisions
//! - The slot and the waiter share nothing but a oneshot channel
//! - Only the side that removes the slot from the session may answer it,
//!   so a response is produced exactly once
//! - Dropping the waiter cancels its timer; the session notices the closed
//!   channel on the next delivery

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::bosh::packet::Packet;
use crate::bosh::session::{Session, SessionId};
use crate::net::connection::ConnectionId;
use crate::observability::metrics;

static SLOT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a held slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

impl SlotId {
    fn next() -> Self {
        Self(SLOT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// How a held response ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Outbound packets were delivered.
    Data(Vec<Packet>),
    /// `max_wait` elapsed with nothing to send.
    Expired,
    /// Released early to make room for a newer request.
    Evicted,
    /// The session ended.
    Terminated { condition: Option<&'static str> },
}

impl Release {
    /// Metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Release::Data(_) => "data",
            Release::Expired => "expired",
            Release::Evicted => "evicted",
            Release::Terminated { .. } => "terminated",
        }
    }

    fn session_gone() -> Self {
        Release::Terminated { condition: None }
    }
}

/// A pending response obligation attached to a session.
#[derive(Debug)]
pub struct ConnectionSlot {
    id: SlotId,
    session: SessionId,
    connection: ConnectionId,
    rid: u64,
    arrived: Instant,
    deadline: Instant,
    responder: oneshot::Sender<Release>,
}

impl ConnectionSlot {
    /// Open a slot for request `rid`, due `max_wait` from now.
    pub(crate) fn open(
        session: SessionId,
        connection: ConnectionId,
        rid: u64,
        max_wait: Duration,
    ) -> (Self, PendingResponse) {
        let (responder, rx) = oneshot::channel();
        let arrived = Instant::now();
        let deadline = arrived + max_wait;
        let id = SlotId::next();

        tracing::trace!(session_id = %session, slot = %id, rid, connection = %connection, "Slot opened");

        (
            Self {
                id,
                session,
                connection,
                rid,
                arrived,
                deadline,
                responder,
            },
            PendingResponse {
                slot: id,
                rid,
                deadline,
                rx,
            },
        )
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn rid(&self) -> u64 {
        self.rid
    }

    pub fn arrived(&self) -> Instant {
        self.arrived
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the waiting side has gone away.
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }

    /// Answer the held request. Gives the release back if nobody is waiting.
    pub(crate) fn release(self, release: Release) -> Result<(), Release> {
        tracing::trace!(
            session_id = %self.session,
            slot = %self.id,
            rid = self.rid,
            kind = release.kind(),
            held_ms = self.arrived.elapsed().as_millis() as u64,
            "Slot released"
        );
        metrics::record_slot_released(release.kind(), self.arrived.elapsed());
        self.responder.send(release)
    }
}

/// The HTTP handler's side of a held slot.
#[derive(Debug)]
pub struct PendingResponse {
    slot: SlotId,
    rid: u64,
    deadline: Instant,
    rx: oneshot::Receiver<Release>,
}

impl PendingResponse {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn rid(&self) -> u64 {
        self.rid
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Suspend until the session releases the slot or the deadline passes.
    pub async fn wait(mut self, session: &Session) -> Release {
        let outcome = tokio::select! {
            release = &mut self.rx => Some(release),
            () = tokio::time::sleep_until(self.deadline) => None,
        };

        match outcome {
            Some(release) => release.unwrap_or_else(|_| Release::session_gone()),
            None if session.expire_slot(self.slot) => Release::Expired,
            // Lost the race: the session already removed the slot and sent
            // its release under the same lock.
            None => self.rx.await.unwrap_or_else(|_| Release::session_gone()),
        }
    }
}
