//! Typed request correlation id.
//!
//! Wraps UUIDv7 (time-ordered, globally unique). Opaque on the wire and
//! displayed as standard UUID text for logging. The `short()` form (first 8
//! hex chars) is for human-facing output, never a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A request correlation identifier (UUIDv7).
///
/// Minted once per HTTP request and carried on the system context so every
/// log line and mount operation of one request can be tied together.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(uuid::Uuid);

impl RequestId {
    /// Create a new time-ordered id (UUIDv7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for human display only, not lookup.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Parse from standard UUID text.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_request_id_short_form() {
        let id = RequestId::new();
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_request_id_parse_roundtrip() {
        let id = RequestId::new();
        let parsed = RequestId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
