use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

use crate::{error::Result, session::Session};

/// Shared, lockable handle to one client's session.
///
/// Holding the lock for the whole handling of a message serialises deliveries for the
/// same client while other clients proceed in parallel.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Trait for storing and retrieving client sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Returns the client's session, creating a fresh one on first contact.
    /// Concurrent calls for the same client always receive the same handle.
    async fn get_or_create(&self, client_id: &str) -> Result<SessionHandle>;

    /// Snapshot of the session, waiting for any in-flight message to finish
    async fn get(&self, client_id: &str) -> Result<Option<Session>>;

    async fn delete(&self, client_id: &str) -> Result<()>;

    /// Drops sessions idle for longer than `max_idle`. Sessions that are busy handling
    /// a message, or whose handle is held elsewhere, are kept. Returns how many sessions were removed.
    async fn evict_idle(&self, max_idle: Duration) -> Result<usize>;
}

/// In-memory implementation of SessionStorage
#[derive(Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn get_or_create(&self, client_id: &str) -> Result<SessionHandle> {
        let handle = self
            .sessions
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(client_id))))
            .clone();
        Ok(handle)
    }

    async fn get(&self, client_id: &str) -> Result<Option<Session>> {
        // Clone the handle first so no shard lock is held across the await.
        let handle = self.sessions.get(client_id).map(|entry| entry.clone());
        match handle {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, client_id: &str) -> Result<()> {
        self.sessions.remove(client_id);
        Ok(())
    }

    async fn evict_idle(&self, max_idle: Duration) -> Result<usize> {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| {
            // Someone else holds the handle: a message for this client is in flight.
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                // A negative idle time (clock skew) converts to an error and keeps the session.
                Ok(session) => match now.signed_duration_since(session.last_activity).to_std() {
                    Ok(idle) => idle <= max_idle,
                    Err(_) => true,
                },
                Err(_) => true,
            }
        });
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Stage;

    #[tokio::test]
    async fn test_get_or_create_is_lazy_and_stable() {
        let storage = InMemorySessionStorage::new();
        assert!(storage.get("whatsapp:+1").await.unwrap().is_none());

        let first = storage.get_or_create("whatsapp:+1").await.unwrap();
        let second = storage.get_or_create("whatsapp:+1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let snapshot = storage.get("whatsapp:+1").await.unwrap().unwrap();
        assert_eq!(snapshot.stage, Stage::Menu);
        assert!(snapshot.last_reply.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_first_contact_creates_one_session() {
        let storage = Arc::new(InMemorySessionStorage::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let storage = storage.clone();
            tasks.push(tokio::spawn(async move {
                storage.get_or_create("whatsapp:+2").await.unwrap()
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert_eq!(storage.len(), 1);
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[tokio::test]
    async fn test_evict_idle_skips_busy_sessions() {
        let storage = InMemorySessionStorage::new();
        let idle = storage.get_or_create("idle").await.unwrap();
        let busy = storage.get_or_create("busy").await.unwrap();
        storage.get_or_create("fresh").await.unwrap();

        let long_ago = Utc::now() - chrono::Duration::hours(2);
        idle.lock().await.last_activity = long_ago;
        busy.lock().await.last_activity = long_ago;

        drop(idle);
        let _guard = busy.lock().await;
        let removed = storage.evict_idle(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(storage.get("fresh").await.unwrap().is_some());
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = InMemorySessionStorage::new();
        storage.get_or_create("gone").await.unwrap();
        storage.delete("gone").await.unwrap();
        assert!(storage.is_empty());
    }
}
