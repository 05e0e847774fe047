//! On-disk cache of discovered tool capabilities.
//!
//! Each server configuration gets one JSON file named after its fingerprint.
//! Entries expire after [`DEFAULT_TTL_HOURS`]; any change to the server's name,
//! transport (command and args, or URL and header names) or env keys changes
//! the fingerprint and therefore misses.
//!
//! Writes go to a uniquely named temp file that is renamed into place, so
//! two adapters racing on the same fingerprint both succeed and the last
//! rename wins. Readers never observe a partial file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::config::{ServerDescriptor, ServerTransport};
use super::error::CacheError;
use super::types::ToolCapability;

/// How long a discovered tool list stays valid.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Persisted snapshot of one server's capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCacheEntry {
    pub fingerprint: String,
    pub server: String,
    pub capabilities: Vec<ToolCapability>,
    pub captured_at: DateTime<Utc>,
}

impl ToolCacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.captured_at < ttl
    }
}

/// Stable identity of a server configuration.
///
/// Hashes the server name, command, args and the *names* of configured env
/// variables, so rotating a secret value does not force rediscovery but adding
/// a variable does.
pub fn fingerprint(descriptor: &ServerDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(descriptor.name.as_bytes());
    hasher.update([0u8]);
    match &descriptor.transport {
        ServerTransport::Stdio { command, args } => {
            hasher.update(b"stdio\0");
            hasher.update(command.as_bytes());
            for arg in args {
                hasher.update([0u8]);
                hasher.update(arg.as_bytes());
            }
        }
        ServerTransport::StreamableHttp { url, headers } => {
            hasher.update(b"http\0");
            hasher.update(url.as_bytes());
            for name in headers.keys() {
                hasher.update([0u8]);
                hasher.update(name.as_bytes());
            }
        }
    }
    hasher.update([1u8]);
    // BTreeMap keys iterate sorted.
    for key in descriptor.env.keys() {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Directory-backed tool capability cache.
#[derive(Debug, Clone)]
pub struct ToolCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ToolCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Fresh entry for `fingerprint`, if any.
    ///
    /// Missing, stale, unreadable and mismatched entries all read as `None`.
    pub async fn get(&self, fingerprint: &str) -> Option<ToolCacheEntry> {
        self.get_at(fingerprint, Utc::now()).await
    }

    /// Like [`ToolCache::get`], evaluated against an explicit clock.
    pub async fn get_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<ToolCacheEntry> {
        let entry = match self.read(fingerprint).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Ignoring unreadable tool cache entry");
                return None;
            }
        };

        if entry.fingerprint != fingerprint {
            tracing::debug!(fingerprint = %fingerprint, "Tool cache fingerprint mismatch");
            return None;
        }
        if !entry.is_fresh(now, self.ttl) {
            tracing::debug!(
                fingerprint = %fingerprint,
                captured_at = %entry.captured_at,
                "Tool cache entry expired"
            );
            return None;
        }
        Some(entry)
    }

    async fn read(&self, fingerprint: &str) -> Result<Option<ToolCacheEntry>, CacheError> {
        match tokio::fs::read(self.path_for(fingerprint)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a freshly discovered capability list.
    pub async fn put(
        &self,
        fingerprint: &str,
        server: &str,
        capabilities: &[ToolCapability],
    ) -> Result<(), CacheError> {
        self.store(&ToolCacheEntry {
            fingerprint: fingerprint.to_string(),
            server: server.to_string(),
            capabilities: capabilities.to_vec(),
            captured_at: Utc::now(),
        })
        .await
    }

    /// Write an entry as-is, replacing any previous one atomically.
    pub async fn store(&self, entry: &ToolCacheEntry) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = self.dir.join(format!(
            "{}.{}.tmp",
            entry.fingerprint,
            uuid::Uuid::new_v4().simple()
        ));
        let bytes = serde_json::to_vec_pretty(entry)?;
        tokio::fs::write(&tmp, bytes).await?;

        if let Err(e) = tokio::fs::rename(&tmp, self.path_for(&entry.fingerprint)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop the entry for `fingerprint`. Missing entries are not an error.
    pub async fn invalidate(&self, fingerprint: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path_for(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every cached entry.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }
}
