//! In-memory session registry.
//!
//! Explicit, injected shared state scoped to the process lifetime. A session
//! is reachable here if and only if it has not been ended. Mutation happens
//! through the [`ContextManager`](super::ContextManager) only (single-writer
//! discipline); the `DashMap` shards serialize concurrent access when the
//! runtime schedules handlers on multiple threads.
//!
//! Session state lives only in this process, so multi-instance deployments
//! need sticky connection affinity; there is no cross-instance migration.

use dashmap::DashMap;

use super::ConversationSession;

/// Map of session id to live session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, ConversationSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created session.
    pub fn insert(&self, session: ConversationSession) {
        self.sessions.insert(session.id.clone(), session);
    }

    /// Remove a session, returning it for end-of-session derivation.
    /// Safe to call for ids that were never registered.
    pub fn remove(&self, session_id: &str) -> Option<ConversationSession> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Read access to one session.
    pub fn with_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&ConversationSession) -> R,
    ) -> Option<R> {
        self.sessions.get(session_id).map(|s| f(s.value()))
    }

    /// Mutable access to one session. The closure runs under the shard lock;
    /// callers must not await while inside it.
    pub fn update<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ConversationSession) -> R,
    ) -> Option<R> {
        self.sessions.get_mut(session_id).map(|mut s| f(s.value_mut()))
    }

    /// Owned copy of one session, for building upstream configuration
    /// outside the shard lock.
    pub fn snapshot(&self, session_id: &str) -> Option<ConversationSession> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{default_persona, MessageRole};

    fn make_session(id: &str) -> ConversationSession {
        ConversationSession::new(
            id.to_string(),
            "conn-1".to_string(),
            default_persona(),
            "en".to_string(),
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("a"));

        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);
        let lang = registry.with_session("a", |s| s.language.clone());
        assert_eq!(lang.as_deref(), Some("en"));
    }

    #[test]
    fn test_remove_makes_session_unreachable() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("a"));

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert!(!registry.contains("a"));
        // Removing again is a no-op, not an error
        assert!(registry.remove("a").is_none());
    }

    #[test]
    fn test_update_in_place() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("a"));

        registry.update("a", |s| s.push_turn(MessageRole::User, "hi".to_string()));
        let count = registry.with_session("a", |s| s.history.len());
        assert_eq!(count, Some(1));

        // Updates against unknown ids are no-ops
        assert!(registry.update("missing", |_| ()).is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("a"));

        let snap = registry.snapshot("a").unwrap();
        registry.update("a", |s| s.language = "tr".to_string());

        assert_eq!(snap.language, "en");
        assert_eq!(
            registry.with_session("a", |s| s.language.clone()).unwrap(),
            "tr"
        );
    }
}
