//! Durable state shared across invocations: conversation checkpoints, the
//! current-thread slot and long-term memories.
//!
//! [`PersistenceLayer`] is the seam; [`SqliteStore`] is the only
//! implementation and lives in `<config_dir>/conversations.db`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Message;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Namespace memories are filed under when none is given.
pub const DEFAULT_MEMORY_NAMESPACE: &str = "myself";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt checkpoint for thread '{thread_id}': {source}")]
    CorruptCheckpoint {
        thread_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored user fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub namespace: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The saved "current conversation" slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentThread {
    pub thread_id: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PersistenceLayer: Send + Sync + std::fmt::Debug {
    // Checkpoints
    async fn load_checkpoint(&self, thread_id: &str) -> Result<Option<Vec<Message>>, StoreError>;
    async fn save_checkpoint(&self, thread_id: &str, messages: &[Message])
    -> Result<(), StoreError>;

    // Current thread slot
    async fn current_thread(&self) -> Result<Option<CurrentThread>, StoreError>;
    async fn set_current_thread(&self, thread_id: &str) -> Result<(), StoreError>;

    /// Write the checkpoint and the current-thread slot in one transaction.
    async fn commit_turn(&self, thread_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    // Memories
    async fn append_memories(&self, namespace: &str, contents: &[String])
    -> Result<(), StoreError>;
    async fn list_memories(&self, namespace: &str) -> Result<Vec<MemoryRecord>, StoreError>;
}
