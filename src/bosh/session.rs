//! Session state machine.
//!
//! # States
//! ```text
//! Negotiating → Active ⇄ Paused
//!                  │        │
//!                  └────────┴──→ Terminated
//! ```
//!
//! # Responsibilities
//! - Own negotiated parameters, held slots, the outbound queue and the rid counter
//! - Answer requests immediately or hold them until data or deadline
//! - Deliver outbound packets in generation order through the oldest slot
//! - Enforce `concurrent_requests`/`hold_requests` by releasing the oldest slot
//!
//! # Design Decisions
//! - One mutex per session; nothing async runs while it is held
//! - Inbound payload is handed back to the caller and submitted outside the lock
//! - Inactivity only counts while no slot is held

use serde::Serialize;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::bosh::error::{BoshError, BoshResult};
use crate::bosh::packet::Packet;
use crate::bosh::params::{Acknowledgment, ParameterNegotiator, SessionParams};
use crate::bosh::request::InboundRequest;
use crate::bosh::sequencer::{RequestSequencer, Sequence};
use crate::bosh::slot::{ConnectionSlot, PendingResponse, Release, SlotId};
use crate::config::BoshConfig;
use crate::net::connection::{ConnectionId, Transport};
use crate::observability::metrics;

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for SessionId {
    type Err = BoshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| BoshError::SessionNotFound(s.to_string()))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl Serialize for SessionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Negotiating,
    Active,
    Paused,
    Terminated,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    ClientRequest,
    OverActivity,
    InactivityTimeout,
    Shutdown,
    Administrative,
}

impl TerminationReason {
    /// Condition reported on held slots released by the termination.
    pub fn condition(&self) -> Option<&'static str> {
        match self {
            TerminationReason::ClientRequest | TerminationReason::InactivityTimeout => None,
            TerminationReason::OverActivity => Some("policy-violation"),
            TerminationReason::Shutdown => Some("system-shutdown"),
            TerminationReason::Administrative => Some("other-request"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::ClientRequest => "client_request",
            TerminationReason::OverActivity => "over_activity",
            TerminationReason::InactivityTimeout => "inactivity_timeout",
            TerminationReason::Shutdown => "shutdown",
            TerminationReason::Administrative => "administrative",
        }
    }
}

/// How an accepted request is answered.
#[derive(Debug)]
pub enum Admission {
    /// Respond now with these packets (possibly none).
    Immediate(Vec<Packet>),
    /// Wait on the held slot.
    Held(PendingResponse),
    /// The request ended the session; respond with the final packets.
    Terminated(Vec<Packet>),
}

/// Result of [`Session::handle_request`].
#[derive(Debug)]
pub struct Accepted {
    pub response: Admission,
    /// Payload to hand to the routing layer.
    pub inbound: Vec<Packet>,
}

/// Point-in-time view of a session for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub domain: String,
    pub state: SessionState,
    pub params: SessionParams,
    pub held_slots: usize,
    pub queued_packets: usize,
    pub last_rid: Option<u64>,
    pub idle_secs: u64,
}

/// A logical session. Clones share state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    id: SessionId,
    core: Mutex<SessionCore>,
}

#[derive(Debug)]
struct SessionCore {
    domain: String,
    params: SessionParams,
    ack: Option<Acknowledgment>,
    content_type: Option<String>,
    state: SessionState,
    sequencer: RequestSequencer,
    slots: VecDeque<ConnectionSlot>,
    outbound: VecDeque<Packet>,
    /// Recently sent responses by rid, for retransmissions.
    replies: VecDeque<(u64, Vec<Packet>)>,
    reply_capacity: usize,
    /// Start of the current stretch with no held slot.
    idle_since: Instant,
    pause_until: Option<Instant>,
}

impl Session {
    /// A fresh session in `Negotiating`, parameterised by `policy` defaults.
    pub fn new(id: SessionId, domain: impl Into<String>, policy: &BoshConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                id,
                core: Mutex::new(SessionCore {
                    domain: domain.into(),
                    params: SessionParams::from_policy(policy),
                    ack: None,
                    content_type: None,
                    state: SessionState::Negotiating,
                    sequencer: RequestSequencer::new(policy.retransmission_window),
                    slots: VecDeque::new(),
                    outbound: VecDeque::new(),
                    replies: VecDeque::new(),
                    reply_capacity: policy.retransmission_window as usize,
                    idle_since: Instant::now(),
                    pause_until: None,
                }),
            }),
        }
    }

    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.core().state
    }

    pub fn domain(&self) -> String {
        self.core().domain.clone()
    }

    pub fn params(&self) -> SessionParams {
        self.core().params
    }

    /// Content type negotiated for every response of this session.
    pub fn content_type(&self) -> Option<String> {
        self.core().content_type.clone()
    }

    pub fn acknowledgment(&self) -> Option<Acknowledgment> {
        self.core().ack
    }

    pub fn held_slots(&self) -> usize {
        self.core().slots.len()
    }

    pub fn queued_packets(&self) -> usize {
        self.core().outbound.len()
    }

    /// Negotiate parameters from the creation request.
    ///
    /// Only the first call negotiates; later calls return the stored
    /// acknowledgment untouched.
    pub fn negotiate(
        &self,
        request: &InboundRequest,
        policy: &BoshConfig,
        transport: &dyn Transport,
    ) -> BoshResult<Acknowledgment> {
        let mut core = self.core();
        match (core.state, core.ack) {
            (SessionState::Terminated, _) => {
                return Err(BoshError::SessionNotFound(self.id().to_string()))
            }
            (SessionState::Negotiating, _) | (_, None) => {}
            (_, Some(ack)) => {
                if let Some(content_type) = core.content_type.as_deref() {
                    transport.set_content_type(content_type);
                }
                return Ok(ack);
            }
        }

        let negotiation = ParameterNegotiator::new(policy).negotiate(request, &core.domain, transport);
        let window = policy.retransmission_window;

        core.params = negotiation.params;
        core.domain = negotiation.domain;
        core.content_type = negotiation.content_type;
        core.ack = Some(negotiation.ack);
        core.sequencer = match request.rid {
            Some(rid) => RequestSequencer::starting_at(rid, window),
            None => RequestSequencer::new(window),
        };
        core.reply_capacity = window as usize;
        core.state = SessionState::Active;
        core.idle_since = Instant::now();

        tracing::info!(
            session_id = %self.id(),
            domain = %core.domain,
            wait = core.params.max_wait,
            hold = core.params.hold_requests,
            requests = core.params.concurrent_requests,
            "Session negotiated"
        );

        Ok(negotiation.ack)
    }

    /// Accept one request arriving on `connection`.
    pub fn handle_request(
        &self,
        request: InboundRequest,
        connection: ConnectionId,
    ) -> BoshResult<Accepted> {
        let id = self.id();
        let mut core = self.core();

        match core.state {
            SessionState::Terminated => return Err(BoshError::SessionNotFound(id.to_string())),
            SessionState::Negotiating => {
                return Err(BoshError::BadRequest("session has not been negotiated".into()))
            }
            SessionState::Active | SessionState::Paused => {}
        }

        let rid = request.rid.ok_or(BoshError::MissingRequestId)?;
        let pause = request
            .pause
            .as_deref()
            .map(|raw| parse_pause(raw, core.params.max_pause))
            .transpose()?;

        let sequence = match core.sequencer.check(rid) {
            Ok(sequence) => sequence,
            Err(err @ BoshError::OverActivity { .. }) => {
                tracing::warn!(session_id = %id, rid, error = %err, "Over-activity, terminating session");
                core.terminate(id, TerminationReason::OverActivity);
                return Err(err);
            }
            Err(err) => {
                tracing::debug!(session_id = %id, rid, error = %err, "Rejected request");
                return Err(err);
            }
        };

        if let Sequence::Retransmission(rid) = sequence {
            if let Some(position) = core.slots.iter().position(|slot| slot.rid() == rid) {
                // Still held: move the hold onto the new connection.
                let (slot, pending) =
                    ConnectionSlot::open(id, connection, rid, core.params.wait_duration());
                let previous = std::mem::replace(&mut core.slots[position], slot);
                tracing::debug!(session_id = %id, rid, slot = %previous.id(), "Retransmitted request, re-holding");
                let _ = previous.release(Release::Evicted);
                return Ok(Accepted {
                    response: Admission::Held(pending),
                    inbound: Vec::new(),
                });
            }

            tracing::debug!(session_id = %id, rid, "Retransmitted request, replaying response");
            return Ok(Accepted {
                response: Admission::Immediate(core.replay(rid)),
                inbound: Vec::new(),
            });
        }

        let now = Instant::now();
        core.idle_since = now;
        if core.state == SessionState::Paused {
            core.state = SessionState::Active;
            core.pause_until = None;
            tracing::info!(session_id = %id, rid, "Session resumed");
        }

        let inbound = request.payload;

        if request.terminate {
            let packets: Vec<Packet> = core.outbound.drain(..).collect();
            core.remember(rid, packets.clone());
            core.terminate(id, TerminationReason::ClientRequest);
            return Ok(Accepted {
                response: Admission::Terminated(packets),
                inbound,
            });
        }

        if let Some(seconds) = pause {
            core.flush();
            while let Some(slot) = core.slots.pop_front() {
                core.remember(slot.rid(), Vec::new());
                let _ = slot.release(Release::Evicted);
            }
            core.state = SessionState::Paused;
            core.pause_until = Some(now + Duration::from_secs(seconds));
            core.remember(rid, Vec::new());
            tracing::info!(session_id = %id, rid, pause_secs = seconds, "Session paused");
            return Ok(Accepted {
                response: Admission::Immediate(Vec::new()),
                inbound,
            });
        }

        if !core.outbound.is_empty() {
            let packets: Vec<Packet> = core.outbound.drain(..).collect();
            core.remember(rid, packets.clone());
            return Ok(Accepted {
                response: Admission::Immediate(packets),
                inbound,
            });
        }

        if core.params.hold_requests == 0 {
            core.remember(rid, Vec::new());
            return Ok(Accepted {
                response: Admission::Immediate(Vec::new()),
                inbound,
            });
        }

        let limit = core
            .params
            .concurrent_requests
            .min(core.params.hold_requests)
            .max(1);
        while core.slots.len() >= limit {
            let Some(oldest) = core.slots.pop_front() else {
                break;
            };
            tracing::debug!(session_id = %id, rid = oldest.rid(), slot = %oldest.id(), "Releasing oldest held request");
            core.remember(oldest.rid(), Vec::new());
            let _ = oldest.release(Release::Evicted);
        }

        let (slot, pending) = ConnectionSlot::open(id, connection, rid, core.params.wait_duration());
        core.slots.push_back(slot);

        Ok(Accepted {
            response: Admission::Held(pending),
            inbound,
        })
    }

    /// Queue packets produced by the routing layer and deliver them to the
    /// oldest held slot, if any.
    pub fn enqueue_outbound(&self, packets: Vec<Packet>) -> BoshResult<()> {
        let mut core = self.core();
        if core.state == SessionState::Terminated {
            return Err(BoshError::SessionNotFound(self.id().to_string()));
        }

        core.outbound.extend(packets);
        core.flush();
        Ok(())
    }

    /// Remove a slot whose deadline passed. False if it was already released.
    pub fn expire_slot(&self, slot: SlotId) -> bool {
        let mut core = self.core();
        let Some(position) = core.slots.iter().position(|s| s.id() == slot) else {
            return false;
        };
        let Some(slot) = core.slots.remove(position) else {
            return false;
        };

        core.remember(slot.rid(), Vec::new());
        let _ = slot.release(Release::Expired);
        if core.slots.is_empty() {
            core.idle_since = Instant::now();
        }
        true
    }

    /// Release every slot due at `now`. Reaps slots whose waiter vanished.
    pub fn expire_overdue_slots(&self, now: Instant) -> usize {
        let mut core = self.core();
        if core.slots.is_empty() {
            return 0;
        }

        let mut expired = 0;
        for slot in std::mem::take(&mut core.slots) {
            if slot.deadline() <= now {
                core.remember(slot.rid(), Vec::new());
                let _ = slot.release(Release::Expired);
                expired += 1;
            } else {
                core.slots.push_back(slot);
            }
        }

        if expired > 0 && core.slots.is_empty() {
            core.idle_since = now;
        }
        expired
    }

    /// Whether the sweep should reap this session at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        let core = self.core();
        match core.state {
            SessionState::Terminated => true,
            SessionState::Paused => core.pause_until.is_some_and(|until| now >= until),
            SessionState::Negotiating | SessionState::Active => {
                core.slots.is_empty()
                    && now.saturating_duration_since(core.idle_since)
                        > core.params.inactivity_duration()
            }
        }
    }

    /// End the session, releasing every held slot. Returns undelivered packets.
    pub fn terminate(&self, reason: TerminationReason) -> Vec<Packet> {
        let id = self.id();
        self.core().terminate(id, reason)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.core();
        let idle_secs = if core.slots.is_empty() {
            core.idle_since.elapsed().as_secs()
        } else {
            0
        };

        SessionSnapshot {
            id: self.id(),
            domain: core.domain.clone(),
            state: core.state,
            params: core.params,
            held_slots: core.slots.len(),
            queued_packets: core.outbound.len(),
            last_rid: core.sequencer.last_accepted(),
            idle_secs,
        }
    }
}

impl SessionCore {
    /// Drain the outbound queue into held slots, oldest first.
    fn flush(&mut self) {
        let had_slots = !self.slots.is_empty();

        while !self.outbound.is_empty() {
            let Some(slot) = self.slots.pop_front() else {
                break;
            };
            let rid = slot.rid();
            let packets: Vec<Packet> = self.outbound.drain(..).collect();

            if slot.release(Release::Data(packets.clone())).is_ok() {
                self.remember(rid, packets);
            } else {
                tracing::debug!(rid, "Held connection gone, requeueing packets");
                for packet in packets.into_iter().rev() {
                    self.outbound.push_front(packet);
                }
            }
        }

        if had_slots && self.slots.is_empty() {
            self.idle_since = Instant::now();
        }
    }

    fn remember(&mut self, rid: u64, packets: Vec<Packet>) {
        if self.reply_capacity == 0 {
            return;
        }
        self.replies.push_back((rid, packets));
        while self.replies.len() > self.reply_capacity {
            self.replies.pop_front();
        }
    }

    fn replay(&self, rid: u64) -> Vec<Packet> {
        self.replies
            .iter()
            .rev()
            .find(|(sent, _)| *sent == rid)
            .map(|(_, packets)| packets.clone())
            .unwrap_or_default()
    }

    fn terminate(&mut self, id: SessionId, reason: TerminationReason) -> Vec<Packet> {
        if self.state == SessionState::Terminated {
            return Vec::new();
        }

        self.state = SessionState::Terminated;
        self.pause_until = None;

        let condition = reason.condition();
        for slot in self.slots.drain(..) {
            let _ = slot.release(Release::Terminated { condition });
        }

        let undelivered: Vec<Packet> = self.outbound.drain(..).collect();
        metrics::record_session_terminated(reason.as_str());
        if !undelivered.is_empty() && reason != TerminationReason::ClientRequest {
            tracing::warn!(
                session_id = %id,
                reason = reason.as_str(),
                dropped = undelivered.len(),
                "Dropping undelivered packets"
            );
        }
        tracing::info!(
            session_id = %id,
            reason = reason.as_str(),
            undelivered = undelivered.len(),
            "Session terminated"
        );
        undelivered
    }
}

fn parse_pause(raw: &str, max_pause: u64) -> BoshResult<u64> {
    let requested = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| BoshError::BadRequest(format!("malformed pause value {raw:?}")))?;

    if requested > max_pause {
        return Err(BoshError::PauseTooLong {
            requested,
            max: max_pause,
        });
    }
    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionHandle;

    fn policy(hold: usize, concurrent: usize) -> BoshConfig {
        BoshConfig {
            max_wait_secs: 5,
            max_inactivity_secs: 10,
            hold_requests: hold,
            concurrent_requests: concurrent,
            max_pause_secs: 120,
            retransmission_window: 1,
            ..BoshConfig::default()
        }
    }

    fn open(policy: &BoshConfig) -> Session {
        let session = Session::new(SessionId::random(), "localhost", policy);
        let request = InboundRequest::default().with_rid(1);
        session
            .negotiate(&request, policy, &ConnectionHandle::detached())
            .unwrap();
        session
    }

    fn request(rid: u64) -> InboundRequest {
        InboundRequest::default().with_rid(rid)
    }

    fn held(session: &Session, rid: u64) -> PendingResponse {
        match session.handle_request(request(rid), ConnectionId::new()).unwrap().response {
            Admission::Held(pending) => pending,
            other => panic!("expected held response, got {other:?}"),
        }
    }

    fn immediate(session: &Session, request: InboundRequest) -> Vec<Packet> {
        match session.handle_request(request, ConnectionId::new()).unwrap().response {
            Admission::Immediate(packets) => packets,
            other => panic!("expected immediate response, got {other:?}"),
        }
    }

    fn packets(raw: &[&str]) -> Vec<Packet> {
        raw.iter().map(|p| Packet::from(*p)).collect()
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::random();
        assert_eq!(id.to_string().parse::<SessionId>(), Ok(id));
        assert!(matches!(
            "nope".parse::<SessionId>(),
            Err(BoshError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_negotiation_activates_once() {
        let policy = policy(1, 2);
        let session = Session::new(SessionId::random(), "localhost", &policy);
        assert_eq!(session.state(), SessionState::Negotiating);

        let first = InboundRequest {
            wait: Some("3".into()),
            to: Some("chat.example".into()),
            ..request(1)
        };
        let ack = session
            .negotiate(&first, &policy, &ConnectionHandle::detached())
            .unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(ack.wait, 3);
        assert_eq!(session.domain(), "chat.example");

        let second = InboundRequest {
            wait: Some("1".into()),
            to: Some("other.example".into()),
            ..request(1)
        };
        let again = session
            .negotiate(&second, &policy, &ConnectionHandle::detached())
            .unwrap();
        assert_eq!(again, ack);
        assert_eq!(session.params().max_wait, 3);
        assert_eq!(session.domain(), "chat.example");
    }

    #[tokio::test]
    async fn test_request_before_negotiation_is_rejected() {
        let session = Session::new(SessionId::random(), "localhost", &policy(1, 2));
        let err = session
            .handle_request(request(1), ConnectionId::new())
            .unwrap_err();
        assert!(matches!(err, BoshError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_queued_packets_answer_immediately() {
        let session = open(&policy(1, 2));
        session.enqueue_outbound(packets(&["A", "B"])).unwrap();

        assert_eq!(immediate(&session, request(2)), packets(&["A", "B"]));
        assert_eq!(session.queued_packets(), 0);
    }

    #[tokio::test]
    async fn test_held_slot_receives_pushed_packets() {
        let session = open(&policy(1, 2));
        let pending = held(&session, 2);
        assert_eq!(session.held_slots(), 1);

        session.enqueue_outbound(packets(&["A"])).unwrap();
        assert_eq!(session.held_slots(), 0);
        assert_eq!(pending.wait(&session).await, Release::Data(packets(&["A"])));
    }

    #[tokio::test]
    async fn test_ordering_across_slots() {
        let session = open(&policy(5, 3));
        let first = held(&session, 2);
        let second = held(&session, 3);

        session.enqueue_outbound(packets(&["A"])).unwrap();
        session.enqueue_outbound(packets(&["B", "C"])).unwrap();

        let mut delivered = Vec::new();
        for pending in [first, second] {
            match pending.wait(&session).await {
                Release::Data(p) => delivered.extend(p),
                other => panic!("unexpected release {other:?}"),
            }
        }
        assert_eq!(delivered, packets(&["A", "B", "C"]));
    }

    #[tokio::test]
    async fn test_ordering_when_queued_before_request() {
        let session = open(&policy(5, 3));
        session.enqueue_outbound(packets(&["A"])).unwrap();
        session.enqueue_outbound(packets(&["B"])).unwrap();
        session.enqueue_outbound(packets(&["C"])).unwrap();

        assert_eq!(immediate(&session, request(2)), packets(&["A", "B", "C"]));
    }

    #[tokio::test]
    async fn test_concurrency_cap_releases_exactly_the_oldest() {
        let session = open(&policy(5, 2));
        let oldest = held(&session, 2);
        let middle = held(&session, 3);
        assert_eq!(session.held_slots(), 2);

        let newest = held(&session, 4);
        assert_eq!(session.held_slots(), 2);
        assert_eq!(oldest.wait(&session).await, Release::Evicted);

        session.enqueue_outbound(packets(&["X"])).unwrap();
        assert_eq!(middle.wait(&session).await, Release::Data(packets(&["X"])));
        assert_eq!(session.held_slots(), 1);
        drop(newest);
    }

    #[tokio::test]
    async fn test_hold_cap_releases_oldest() {
        let session = open(&policy(1, 2));
        let first = held(&session, 2);
        let _second = held(&session, 3);

        assert_eq!(session.held_slots(), 1);
        assert_eq!(first.wait(&session).await, Release::Evicted);
    }

    #[tokio::test]
    async fn test_zero_hold_answers_immediately() {
        let session = open(&policy(0, 2));
        assert!(immediate(&session, request(2)).is_empty());
        assert_eq!(session.held_slots(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_expires_at_max_wait() {
        let session = open(&policy(1, 2));
        let start = Instant::now();
        let pending = held(&session, 2);

        assert_eq!(pending.wait(&session).await, Release::Expired);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "released early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(5050), "released late: {elapsed:?}");
        assert_eq!(session.held_slots(), 0);
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_is_not_released_before_deadline() {
        let session = open(&policy(1, 2));
        let pending = held(&session, 2);

        let waiter = session.clone();
        let handle = tokio::spawn(async move { pending.wait(&waiter).await });

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(!handle.is_finished());
        assert_eq!(handle.await.unwrap(), Release::Expired);
    }

    #[tokio::test]
    async fn test_out_of_order_request() {
        let session = open(&policy(0, 2));

        immediate(&session, request(2));
        let err = session
            .handle_request(request(4), ConnectionId::new())
            .unwrap_err();
        assert_eq!(err, BoshError::OutOfOrderRequest { expected: 3, got: 4 });
        assert_eq!(session.state(), SessionState::Active);

        immediate(&session, request(3));
    }

    #[tokio::test]
    async fn test_replay_terminates_and_releases_slots() {
        let session = open(&policy(5, 2));
        let first = held(&session, 2);
        let second = held(&session, 3);

        let err = session
            .handle_request(request(2), ConnectionId::new())
            .unwrap_err();
        assert_eq!(err, BoshError::OverActivity { got: 2, last_accepted: 3 });
        assert_eq!(session.state(), SessionState::Terminated);

        let terminal = Release::Terminated {
            condition: Some("policy-violation"),
        };
        assert_eq!(first.wait(&session).await, terminal);
        assert_eq!(second.wait(&session).await, terminal);
        assert!(matches!(
            session.handle_request(request(4), ConnectionId::new()),
            Err(BoshError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retransmission_replays_without_resubmitting() {
        let session = open(&policy(1, 2));
        session.enqueue_outbound(packets(&["A"])).unwrap();

        let accepted = session
            .handle_request(request(2).with_payload(packets(&["ping"])), ConnectionId::new())
            .unwrap();
        assert_eq!(accepted.inbound, packets(&["ping"]));

        let replay = session
            .handle_request(request(2).with_payload(packets(&["ping"])), ConnectionId::new())
            .unwrap();
        assert!(replay.inbound.is_empty());
        match replay.response {
            Admission::Immediate(p) => assert_eq!(p, packets(&["A"])),
            other => panic!("unexpected admission {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_retransmission_of_held_request_moves_the_hold() {
        let session = open(&policy(1, 2));
        let original = held(&session, 2);

        let retry = held(&session, 2);
        assert_eq!(session.held_slots(), 1);
        assert_eq!(original.wait(&session).await, Release::Evicted);

        session.enqueue_outbound(packets(&["A"])).unwrap();
        assert_eq!(retry.wait(&session).await, Release::Data(packets(&["A"])));
        assert_eq!(session.queued_packets(), 0);
    }

    #[tokio::test]
    async fn test_client_terminate() {
        let session = open(&policy(1, 2));
        session.enqueue_outbound(packets(&["last"])).unwrap();

        let terminate = InboundRequest {
            terminate: true,
            ..request(2).with_payload(packets(&["bye"]))
        };
        let accepted = session.handle_request(terminate, ConnectionId::new()).unwrap();
        assert_eq!(accepted.inbound, packets(&["bye"]));
        match accepted.response {
            Admission::Terminated(p) => assert_eq!(p, packets(&["last"])),
            other => panic!("unexpected admission {other:?}"),
        }

        assert_eq!(session.state(), SessionState::Terminated);
        assert!(session.enqueue_outbound(packets(&["late"])).is_err());
    }

    #[tokio::test]
    async fn test_terminate_releases_held_slots() {
        let session = open(&policy(1, 2));
        let pending = held(&session, 2);

        let undelivered = session.terminate(TerminationReason::Shutdown);
        assert!(undelivered.is_empty());
        assert_eq!(
            pending.wait(&session).await,
            Release::Terminated {
                condition: Some("system-shutdown"),
            }
        );
        assert_eq!(session.held_slots(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_slot_does_not_lose_packets() {
        let session = open(&policy(5, 3));
        let gone = held(&session, 2);
        let alive = held(&session, 3);
        drop(gone);

        session.enqueue_outbound(packets(&["A", "B"])).unwrap();
        assert_eq!(alive.wait(&session).await, Release::Data(packets(&["A", "B"])));
    }

    #[tokio::test]
    async fn test_abandoned_last_slot_keeps_packets_queued() {
        let session = open(&policy(1, 2));
        drop(held(&session, 2));

        session.enqueue_outbound(packets(&["A"])).unwrap();
        assert_eq!(session.queued_packets(), 1);
        assert_eq!(immediate(&session, request(3)), packets(&["A"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let session = open(&policy(1, 2));
        let pending = held(&session, 2);

        let too_long = InboundRequest {
            pause: Some("500".into()),
            ..request(3)
        };
        assert_eq!(
            session.handle_request(too_long, ConnectionId::new()).unwrap_err(),
            BoshError::PauseTooLong {
                requested: 500,
                max: 120,
            }
        );

        let pause = InboundRequest {
            pause: Some("60".into()),
            ..request(3)
        };
        assert!(immediate(&session, pause).is_empty());
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(pending.wait(&session).await, Release::Evicted);

        let now = Instant::now();
        assert!(!session.is_expired(now + Duration::from_secs(59)));
        assert!(session.is_expired(now + Duration::from_secs(60)));

        session.enqueue_outbound(packets(&["queued"])).unwrap();
        assert_eq!(immediate(&session, request(4)), packets(&["queued"]));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_only_counts_without_held_slots() {
        let session = open(&policy(1, 2));
        let now = Instant::now();
        assert!(!session.is_expired(now + Duration::from_secs(9)));
        assert!(session.is_expired(now + Duration::from_secs(11)));

        let _pending = held(&session, 2);
        assert!(!session.is_expired(now + Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_slots_are_reaped() {
        let session = open(&policy(1, 2));
        let pending = held(&session, 2);

        assert_eq!(session.expire_overdue_slots(Instant::now() + Duration::from_secs(1)), 0);
        assert_eq!(session.expire_overdue_slots(Instant::now() + Duration::from_secs(6)), 1);
        assert_eq!(session.held_slots(), 0);
        assert_eq!(pending.wait(&session).await, Release::Expired);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let session = open(&policy(1, 2));
        let _pending = held(&session, 2);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Active);
        assert_eq!(snapshot.held_slots, 1);
        assert_eq!(snapshot.last_rid, Some(2));
        assert_eq!(snapshot.idle_secs, 0);
    }
}
