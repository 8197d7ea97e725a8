//! Opaque protocol payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single serialized protocol packet.
///
/// The session layer never looks inside a packet; parsing and routing of
/// stanzas belong to the surrounding component framework.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Packet(String);

impl Packet {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Packet {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Packet {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
