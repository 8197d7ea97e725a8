//! Inbound request attributes consumed by the session layer.

use crate::bosh::packet::Packet;

pub const SID_ATTR: &str = "sid";
pub const RID_ATTR: &str = "rid";
pub const WAIT_ATTR: &str = "wait";
pub const HOLD_ATTR: &str = "hold";
pub const TO_ATTR: &str = "to";
pub const CONTENT_ATTR: &str = "content";
pub const PAUSE_ATTR: &str = "pause";
pub const TYPE_ATTR: &str = "type";

/// One decoded client request.
///
/// `wait`, `hold` and `pause` are kept raw: how malformed values degrade is
/// decided where they are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    /// Session identifier. Absent on the session creation request.
    pub sid: Option<String>,
    /// Request id.
    pub rid: Option<u64>,
    pub wait: Option<String>,
    pub hold: Option<String>,
    /// Routing domain override, honoured on the creation request only.
    pub to: Option<String>,
    /// Desired response content type.
    pub content: Option<String>,
    pub pause: Option<String>,
    /// Client asked to end the session.
    pub terminate: bool,
    pub payload: Vec<Packet>,
}

impl InboundRequest {
    /// A creation request carries no session identifier.
    pub fn is_session_creation(&self) -> bool {
        self.sid.is_none()
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_rid(mut self, rid: u64) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn with_payload(mut self, packets: impl IntoIterator<Item = Packet>) -> Self {
        self.payload.extend(packets);
        self
    }
}
