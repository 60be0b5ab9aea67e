//! Client identity: a process-unique id allocated per session cycle.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PREFIX: &str = "client_";

/// Opaque client identifier, unique within the store namespace with
/// overwhelming probability. Allocated fresh at session start and again on
/// every restart; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn allocate() -> Self {
        ClientId(format!("{PREFIX}{}", Uuid::new_v4()))
    }

    /// Accept an id read back from the store. Rejects strings that cannot be
    /// a path segment.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.contains('/') {
            None
        } else {
            Some(ClientId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_unique() {
        let a = ClientId::allocate();
        let b = ClientId::allocate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(PREFIX));
    }

    #[test]
    fn parse_rejects_path_hostile_ids() {
        assert!(ClientId::parse("").is_none());
        assert!(ClientId::parse("a/b").is_none());
        assert_eq!(
            ClientId::parse("client_x").map(|id| id.as_str().to_string()),
            Some("client_x".to_string())
        );
    }

    #[test]
    fn serde_is_transparent() {
        let id = ClientId::allocate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_str()));
    }
}
