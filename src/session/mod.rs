//! Conversation continuity across process invocations.
//!
//! Each run either continues the saved "current" thread or starts a new
//! one. The thread's message history is checkpointed after every turn that
//! completed (or was deliberately stopped at a confirmation prompt), together
//! with the current-thread slot, in a single transaction.
//!
//! # Architecture
//!
//! - [`ThreadId`]: opaque conversation identifier
//! - [`ConversationManager`]: resolves, loads and checkpoints threads

mod thread;

pub use thread::ThreadId;

use std::sync::Arc;

use crate::llm::Message;
use crate::storage::{PersistenceLayer, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Continuation was requested but no usable thread is saved.
    #[error("no previous conversation to continue")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Thread resolution and persistence on top of a [`PersistenceLayer`].
#[derive(Debug, Clone)]
pub struct ConversationManager {
    store: Arc<dyn PersistenceLayer>,
}

impl ConversationManager {
    pub fn new(store: Arc<dyn PersistenceLayer>) -> Self {
        Self { store }
    }

    /// The saved thread when `continue_previous`, otherwise a fresh one.
    pub async fn resolve_thread(&self, continue_previous: bool) -> Result<ThreadId, SessionError> {
        if !continue_previous {
            return Ok(ThreadId::generate());
        }

        let current = self.store.current_thread().await?.ok_or(SessionError::NotFound)?;
        ThreadId::parse(&current.thread_id).ok_or_else(|| {
            tracing::warn!(thread_id = %current.thread_id, "Saved thread id is malformed");
            SessionError::NotFound
        })
    }

    /// Like [`ConversationManager::resolve_thread`], starting a new thread when
    /// there is nothing to continue.
    pub async fn resolve_or_start(&self, continue_previous: bool) -> Result<ThreadId, StoreError> {
        match self.resolve_thread(continue_previous).await {
            Ok(id) => {
                tracing::debug!(thread_id = %id, continued = continue_previous, "Resolved thread");
                Ok(id)
            }
            Err(SessionError::NotFound) => {
                tracing::warn!("No previous conversation found, starting a new one");
                Ok(ThreadId::generate())
            }
            Err(SessionError::Store(e)) => Err(e),
        }
    }

    /// Mark `id` as the current thread.
    pub async fn save_thread(&self, id: &ThreadId) -> Result<(), StoreError> {
        self.store.set_current_thread(id.as_str()).await
    }

    /// Persisted messages of `id`; empty for a new thread.
    pub async fn load_history(&self, id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .store
            .load_checkpoint(id.as_str())
            .await?
            .unwrap_or_default())
    }

    /// Store the thread's messages and make it current, atomically.
    pub async fn checkpoint_turn(
        &self,
        id: &ThreadId,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        self.store.commit_turn(id.as_str(), messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    async fn manager() -> ConversationManager {
        let store = SqliteStore::open_in_memory().await.unwrap();
        ConversationManager::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_fresh_threads_are_distinct() {
        let m = manager().await;
        let a = m.resolve_thread(false).await.unwrap();
        let b = m.resolve_thread(false).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_continue_without_saved_thread() {
        let m = manager().await;
        assert!(matches!(
            m.resolve_thread(true).await,
            Err(SessionError::NotFound)
        ));
        assert!(m.resolve_or_start(true).await.is_ok());
    }

    #[tokio::test]
    async fn test_continue_returns_saved_thread() {
        let m = manager().await;
        let id = m.resolve_thread(false).await.unwrap();
        m.save_thread(&id).await.unwrap();

        assert_eq!(m.resolve_thread(true).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_checkpoint_then_load_history() {
        let m = manager().await;
        let id = ThreadId::generate();
        assert!(m.load_history(&id).await.unwrap().is_empty());

        m.checkpoint_turn(&id, &[Message::user("hi"), Message::assistant("hello")])
            .await
            .unwrap();

        assert_eq!(m.load_history(&id).await.unwrap().len(), 2);
        assert_eq!(m.resolve_thread(true).await.unwrap(), id);
    }
}
