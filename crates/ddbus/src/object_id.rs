//! Identity of a remote bus object.

use std::fmt;
use std::sync::Arc;

/// Strong type for session identifiers handed out by the bus.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Unique key of one remote object for as long as it is discovered.
///
/// Bus name, object path and session id together form the key: equality,
/// hashing and ordering use all three. The strings are reference counted so
/// that cloning an id into every dispatch task stays cheap.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId {
    bus_name: Arc<str>,
    object_path: Arc<str>,
    session_id: SessionId,
}

impl ObjectId {
    pub fn new(bus_name: impl Into<Arc<str>>, object_path: impl Into<Arc<str>>, session_id: SessionId) -> Self {
        Self {
            bus_name: bus_name.into(),
            object_path: object_path.into(),
            session_id,
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId(bus name: {}, object path: {})", self.bus_name, self.object_path)
    }
}

/// Checks the object path grammar: `/` or `/`-separated non-empty elements
/// of `[A-Za-z0-9_]`, no trailing slash.
pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else { return false };
    rest.split('/').all(|element| {
        !element.is_empty() && element.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_uses_all_fields() {
        let a = ObjectId::new(":1.4", "/door/front", SessionId(1));
        let b = ObjectId::new(":1.4", "/door/front", SessionId(1));
        let other_session = ObjectId::new(":1.4", "/door/front", SessionId(2));

        assert_eq!(a, b);
        assert_ne!(a, other_session);
    }

    #[test]
    fn test_display() {
        let id = ObjectId::new(":1.4", "/door/front", SessionId(3));
        assert_eq!(id.to_string(), "ObjectId(bus name: :1.4, object path: /door/front)");
    }

    #[test]
    fn test_object_path_grammar() {
        assert!(is_valid_object_path("/"));
        assert!(is_valid_object_path("/a/b_c/D1"));
        assert!(!is_valid_object_path(""));
        assert!(!is_valid_object_path("a/b"));
        assert!(!is_valid_object_path("/a/"));
        assert!(!is_valid_object_path("/a//b"));
        assert!(!is_valid_object_path("/a-b"));
    }
}
