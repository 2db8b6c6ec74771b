//! Session repository.
//!
//! The repository is injected into the orchestrator and the server. Each
//! entry is written only by the task running that session; readers get
//! snapshots.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::session::Session;

pub trait SessionRepository: Send + Sync {
    fn get(&self, id: &str) -> Option<Session>;

    /// Insert or replace the record for `session.id`.
    fn put(&self, session: Session);

    fn delete(&self, id: &str) -> Option<Session>;

    /// Snapshots ordered by creation time, oldest first.
    fn list(&self) -> Vec<Session>;
}

#[derive(Clone, Default)]
pub struct InMemorySessions {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRepository for InMemorySessions {
    fn get(&self, id: &str) -> Option<Session> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn put(&self, session: Session) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session);
    }

    fn delete(&self, id: &str) -> Option<Session> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let repo = InMemorySessions::new();
        assert!(repo.get("a").is_none());

        repo.put(Session::new("a", "pong", 3));
        let mut updated = repo.get("a").expect("stored");
        updated.retries = 1;
        repo.put(updated);
        assert_eq!(repo.get("a").expect("stored").retries, 1);

        assert!(repo.delete("a").is_some());
        assert!(repo.get("a").is_none());
        assert!(repo.delete("a").is_none());
    }

    #[test]
    fn list_is_ordered_by_creation() {
        let repo = InMemorySessions::new();
        let first = Session::new("z-first", "one", 1);
        let mut second = Session::new("a-second", "two", 1);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        repo.put(second);
        repo.put(first);

        let ids: Vec<String> = repo.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["z-first".to_string(), "a-second".to_string()]);
    }
}
