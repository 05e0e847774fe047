//! `SQLite` implementation of [`PersistenceLayer`].

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::{CurrentThread, MemoryRecord, PersistenceLayer, StoreError};
use crate::llm::Message;

/// Store backed by a single `SQLite` file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and ensure the schema.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true),
        )
        .await?;

        let store = Self { pool };
        store.create_schema().await?;
        tracing::debug!(path = %db_path.display(), "Opened conversation store");
        Ok(store)
    }

    /// Open an existing database read-only; `None` when there is none yet.
    ///
    /// Nothing is created on disk, not even the parent directory.
    pub async fn open_existing(db_path: &Path) -> Result<Option<Self>, StoreError> {
        if !tokio::fs::try_exists(db_path).await? {
            return Ok(None);
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(false)
                .read_only(true),
        )
        .await?;
        tracing::debug!(path = %db_path.display(), "Opened conversation store read-only");
        Ok(Some(Self { pool }))
    }

    /// Fresh in-memory database with the full schema.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Safe to call repeatedly; every statement is `IF NOT EXISTS`.
    async fn create_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY NOT NULL,
                messages TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_namespace ON memories(namespace)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS last_conversation (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                thread_id TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Close the pool, waiting for connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn upsert_checkpoint(
        tx: &mut Transaction<'_, Sqlite>,
        thread_id: &str,
        encoded: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO checkpoints (thread_id, messages, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(thread_id) DO UPDATE SET messages = excluded.messages, updated_at = excluded.updated_at",
        )
        .bind(thread_id)
        .bind(encoded)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_current_thread(
        tx: &mut Transaction<'_, Sqlite>,
        thread_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO last_conversation (id, thread_id, updated_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET thread_id = excluded.thread_id, updated_at = excluded.updated_at",
        )
        .bind(thread_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceLayer for SqliteStore {
    async fn load_checkpoint(&self, thread_id: &str) -> Result<Option<Vec<Message>>, StoreError> {
        let row = sqlx::query("SELECT messages FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.get("messages");
        let messages =
            serde_json::from_str(&raw).map_err(|source| StoreError::CorruptCheckpoint {
                thread_id: thread_id.to_string(),
                source,
            })?;
        Ok(Some(messages))
    }

    async fn save_checkpoint(
        &self,
        thread_id: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(messages)?;
        let mut tx = self.pool.begin().await?;
        Self::upsert_checkpoint(&mut tx, thread_id, &encoded, Utc::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn current_thread(&self) -> Result<Option<CurrentThread>, StoreError> {
        let row = sqlx::query("SELECT thread_id, updated_at FROM last_conversation WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| CurrentThread {
            thread_id: r.get("thread_id"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn set_current_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_current_thread(&mut tx, thread_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_turn(&self, thread_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(messages)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        Self::upsert_checkpoint(&mut tx, thread_id, &encoded, now).await?;
        Self::upsert_current_thread(&mut tx, thread_id, now).await?;
        tx.commit().await?;

        tracing::debug!(thread_id = %thread_id, message_count = messages.len(), "Checkpointed turn");
        Ok(())
    }

    async fn append_memories(
        &self,
        namespace: &str,
        contents: &[String],
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for content in contents {
            sqlx::query("INSERT INTO memories (namespace, content, created_at) VALUES (?, ?, ?)")
                .bind(namespace)
                .bind(content)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_memories(&self, namespace: &str) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, namespace, content, created_at FROM memories
             WHERE namespace = ?
             ORDER BY id ASC",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| MemoryRecord {
                id: row.get("id"),
                namespace: row.get("namespace"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
