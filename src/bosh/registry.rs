//! Process-wide session table.
//!
//! # Responsibilities
//! - Mint session ids and map them to live sessions
//! - Hold the current server policy, swappable at runtime
//! - Periodically reap overdue slots and expired sessions
//! - Tell the router whenever a session leaves the table
//!
//! # Design Decisions
//! - `DashMap` shards the table; no global lock on the request path
//! - Policy lives in an `ArcSwap` so a reload never blocks a negotiation
//! - A removed session is terminated before it leaves the table

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::bosh::error::{BoshError, BoshResult};
use crate::bosh::packet::Packet;
use crate::bosh::params::Acknowledgment;
use crate::bosh::request::InboundRequest;
use crate::bosh::session::{Session, SessionId, SessionSnapshot, TerminationReason};
use crate::config::BoshConfig;
use crate::net::connection::Transport;
use crate::observability::metrics;
use crate::routing::{PacketRouter, Route};

/// Registry of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
    policy: ArcSwap<BoshConfig>,
    router: Arc<dyn PacketRouter>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("policy", &self.policy.load_full())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(policy: BoshConfig, router: Arc<dyn PacketRouter>) -> Self {
        Self {
            sessions: DashMap::new(),
            policy: ArcSwap::from_pointee(policy),
            router,
        }
    }

    /// Router that receives inbound payloads and close notifications.
    pub fn router(&self) -> &Arc<dyn PacketRouter> {
        &self.router
    }

    /// Current policy snapshot.
    pub fn policy(&self) -> Arc<BoshConfig> {
        self.policy.load_full()
    }

    /// Swap in a new policy. Existing sessions keep their parameters.
    pub fn update_policy(&self, policy: BoshConfig) {
        if *self.policy.load_full() == policy {
            return;
        }
        tracing::info!(
            max_wait_secs = policy.max_wait_secs,
            hold_requests = policy.hold_requests,
            concurrent_requests = policy.concurrent_requests,
            "Session policy updated"
        );
        self.policy.store(Arc::new(policy));
    }

    /// Register a new session in `Negotiating` under a fresh id.
    pub fn create(&self, domain: Option<&str>) -> Session {
        let policy = self.policy();
        let domain = domain.unwrap_or(policy.default_domain.as_str());

        let session = loop {
            let id = SessionId::random();
            if let Entry::Vacant(entry) = self.sessions.entry(id) {
                break entry.insert(Session::new(id, domain, &policy)).value().clone();
            }
        };

        metrics::record_session_created();
        metrics::record_active_sessions(self.sessions.len());
        tracing::debug!(session_id = %session.id(), "Session created");
        session
    }

    /// Create and negotiate a session from its creation request.
    pub fn open(
        &self,
        request: &InboundRequest,
        transport: &dyn Transport,
    ) -> BoshResult<(Session, Acknowledgment)> {
        let policy = self.policy();
        let session = self.create(request.to.as_deref());
        match session.negotiate(request, &policy, transport) {
            Ok(ack) => Ok((session, ack)),
            Err(err) => {
                // Never routed, so the router is not told.
                self.take(session.id());
                Err(err)
            }
        }
    }

    pub fn lookup(&self, id: SessionId) -> BoshResult<Session> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BoshError::SessionNotFound(id.to_string()))
    }

    /// Resolve a raw `sid` attribute.
    pub fn lookup_raw(&self, sid: &str) -> BoshResult<Session> {
        self.lookup(sid.parse()?)
    }

    /// Drop a session from the table and notify the router. Later lookups
    /// report it missing.
    pub fn remove(&self, id: SessionId) -> Option<Session> {
        let session = self.take(id)?;
        self.closed(&session);
        Some(session)
    }

    /// Terminate and remove a session, returning its undelivered packets.
    pub fn terminate(&self, id: SessionId, reason: TerminationReason) -> BoshResult<Vec<Packet>> {
        let session = self
            .take(id)
            .ok_or_else(|| BoshError::SessionNotFound(id.to_string()))?;
        let undelivered = session.terminate(reason);
        self.closed(&session);
        Ok(undelivered)
    }

    fn take(&self, id: SessionId) -> Option<Session> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);
        if removed.is_some() {
            metrics::record_active_sessions(self.sessions.len());
        }
        removed
    }

    fn closed(&self, session: &Session) {
        self.router
            .session_closed(&Route::new(session.id(), session.domain()));
    }

    /// Push outbound packets into a session.
    pub fn deliver(&self, id: SessionId, packets: Vec<Packet>) -> BoshResult<()> {
        self.lookup(id)?.enqueue_outbound(packets)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|entry| entry.value().snapshot()).collect()
    }

    /// One maintenance pass: release overdue slots, then remove every
    /// session that is terminated, idle past its inactivity limit, or
    /// paused past its pause. Returns the ids removed.
    pub fn sweep(&self) -> Vec<SessionId> {
        let now = Instant::now();
        let mut expired = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();
            session.expire_overdue_slots(now);
            if session.is_expired(now) {
                expired.push(*entry.key());
            }
        }

        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            // Re-check under removal: a request may have revived it meanwhile.
            let Some((_, session)) = self
                .sessions
                .remove_if(&id, |_, session| session.is_expired(now))
            else {
                continue;
            };
            session.terminate(TerminationReason::InactivityTimeout);
            self.closed(&session);
            tracing::info!(session_id = %id, "Session expired");
            removed.push(id);
        }

        if !removed.is_empty() {
            metrics::record_active_sessions(self.sessions.len());
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Session sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if !removed.is_empty() {
                        tracing::debug!(count = removed.len(), "Swept expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Session sweeper stopping");
                    break;
                }
            }
        }
    }

    /// Terminate every session. Used on process shutdown.
    pub fn shutdown(&self) -> usize {
        let ids = self.ids();
        let mut count = 0;
        for id in ids {
            if self.terminate(id, TerminationReason::Shutdown).is_ok() {
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(count, "Terminated sessions on shutdown");
        }
        count
    }
}
