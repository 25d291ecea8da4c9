//! Session registry.
//!
//! An explicit object owned by whoever composes the application — never a
//! process-wide singleton. Sessions are keyed by the name they were
//! created under.

use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::{Error, Result};
use crate::events::EventHub;
use crate::session::Session;

#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a new session publishing to `events`.
    pub async fn create_session(&self, events: EventHub) -> Arc<Session> {
        let session = Arc::new(Session::new(events));
        let name = session.name().await;
        let previous = self.sessions.insert(name.clone(), session.clone());
        // Names are 128-bit random tokens; a collision is a broken RNG.
        assert!(previous.is_none(), "duplicate session name {name}");
        session
    }

    /// Looks a session up by its registration name.
    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.get(name).map(|entry| entry.clone())
    }

    /// Unregisters a session and closes everything it owns.
    pub async fn remove_session(&self, name: &str) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(name)
            .ok_or_else(|| Error::UnknownSession(name.to_owned()))?;
        session.shutdown().await;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_remove() {
        let manager = SessionManager::new();
        let session = manager.create_session(EventHub::default()).await;
        let name = session.name().await;

        assert_eq!(manager.len(), 1);
        assert!(manager.get(&name).is_some());

        manager.remove_session(&name).await.unwrap();
        assert!(manager.is_empty());
        assert!(manager.get(&name).is_none());
    }

    #[tokio::test]
    async fn test_remove_unknown_session() {
        let manager = SessionManager::new();
        assert!(matches!(
            manager.remove_session("missing").await,
            Err(Error::UnknownSession(_))
        ));
    }
}
