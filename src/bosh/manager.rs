//! Request dispatch between the HTTP layer, sessions and the router.
//!
//! # Data Flow
//! ```text
//! InboundRequest
//!     ├─ no sid → SessionRegistry::open → Reply::Created
//!     └─ sid    → Session::handle_request
//!                   → PacketRouter::submit(inbound payload)
//!                   → immediate packets, or PendingResponse::wait
//! ```

use std::sync::Arc;

use crate::bosh::error::{BoshError, BoshResult};
use crate::bosh::packet::Packet;
use crate::bosh::params::{Acknowledgment, SessionParams};
use crate::bosh::registry::SessionRegistry;
use crate::bosh::request::InboundRequest;
use crate::bosh::session::{Admission, SessionId};
use crate::bosh::slot::Release;
use crate::net::connection::Transport;
use crate::routing::Route;

/// What to send back on the physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Session creation response.
    Created {
        sid: SessionId,
        ack: Acknowledgment,
        params: SessionParams,
    },
    /// Ordinary response, possibly empty.
    Packets(Vec<Packet>),
    /// The session is over.
    Terminated {
        packets: Vec<Packet>,
        condition: Option<&'static str>,
    },
}

impl Reply {
    /// Metrics label.
    pub fn outcome(&self) -> &'static str {
        match self {
            Reply::Created { .. } => "created",
            Reply::Packets(packets) if packets.is_empty() => "empty",
            Reply::Packets(_) => "data",
            Reply::Terminated { .. } => "terminated",
        }
    }
}

/// Front door of the session layer. Inbound payloads go to the
/// registry's router.
#[derive(Debug, Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
}

impl SessionManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Process one request to completion. Held requests resolve when the
    /// session releases them or their wait expires.
    pub async fn process(
        &self,
        request: InboundRequest,
        transport: &dyn Transport,
    ) -> BoshResult<Reply> {
        let Some(sid) = request.sid.as_deref() else {
            return self.create(request, transport);
        };

        let session = self.registry.lookup_raw(sid)?;
        if let Some(content_type) = session.content_type() {
            transport.set_content_type(&content_type);
        }
        let route = Route::new(session.id(), session.domain());

        let accepted = match session.handle_request(request, transport.id()) {
            Ok(accepted) => accepted,
            Err(err) => {
                if err.is_fatal() {
                    self.registry.remove(session.id());
                }
                return Err(err);
            }
        };

        self.submit(&route, accepted.inbound);

        let reply = match accepted.response {
            Admission::Immediate(packets) => Reply::Packets(packets),
            Admission::Terminated(packets) => {
                self.registry.remove(session.id());
                Reply::Terminated {
                    packets,
                    condition: None,
                }
            }
            Admission::Held(pending) => match pending.wait(&session).await {
                Release::Data(packets) => Reply::Packets(packets),
                Release::Expired | Release::Evicted => Reply::Packets(Vec::new()),
                Release::Terminated { condition } => Reply::Terminated {
                    packets: Vec::new(),
                    condition,
                },
            },
        };
        Ok(reply)
    }

    fn create(&self, request: InboundRequest, transport: &dyn Transport) -> BoshResult<Reply> {
        if request.terminate {
            return Err(BoshError::BadRequest("terminate without a session".into()));
        }

        let (session, ack) = self.registry.open(&request, transport)?;
        let route = Route::new(session.id(), session.domain());
        self.submit(&route, request.payload);

        Ok(Reply::Created {
            sid: session.id(),
            ack,
            params: session.params(),
        })
    }

    fn submit(&self, route: &Route, packets: Vec<Packet>) {
        if packets.is_empty() {
            return;
        }
        if let Err(e) = self.registry.router().submit(route, packets) {
            tracing::warn!(session_id = %route.sid, error = %e, "Failed to route inbound packets");
        }
    }
}
