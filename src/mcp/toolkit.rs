//! One MCP server and the tools it exposes.
//!
//! A [`McpToolkit`] owns exactly one server subprocess. Its lifecycle is
//!
//! ```text
//! Unstarted → Launching → Discovering → Ready → Closing → Closed
//!                  └──────────┴──→ Failed
//! ```
//!
//! When the capability cache has a fresh entry the toolkit goes straight from
//! `Unstarted` to `Ready` and the subprocess is spawned on the first
//! [`McpToolkit::invoke`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use super::cache::{ToolCache, fingerprint};
use super::config::ServerDescriptor;
use super::error::AdapterError;
use super::launcher::{ServerConnection, ServerLauncher};
use super::types::{ToolCapability, ToolResult};

/// Default deadline for launch plus `tools/list`.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for a single tool call.
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Deadlines applied by a toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub discovery: Duration,
    pub invocation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            discovery: DEFAULT_DISCOVERY_TIMEOUT,
            invocation: DEFAULT_INVOCATION_TIMEOUT,
        }
    }
}

/// Lifecycle state of a toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolkitState {
    Unstarted,
    Launching,
    Discovering,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl ToolkitState {
    fn is_shutting_down(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ToolkitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Launching => "launching",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Adapter around one MCP server subprocess.
pub struct McpToolkit {
    descriptor: ServerDescriptor,
    fingerprint: String,
    launcher: Arc<dyn ServerLauncher>,
    cache: ToolCache,
    timeouts: Timeouts,
    state: Mutex<ToolkitState>,
    connection: tokio::sync::Mutex<Option<Arc<dyn ServerConnection>>>,
    tools: RwLock<Vec<ToolCapability>>,
    /// Live discovery results are not written back to the cache.
    read_only: bool,
}

impl fmt::Debug for McpToolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpToolkit")
            .field("name", &self.descriptor.name)
            .field("state", &self.state())
            .field("tool_count", &self.tools().len())
            .finish_non_exhaustive()
    }
}

impl McpToolkit {
    pub fn new(
        descriptor: ServerDescriptor,
        launcher: Arc<dyn ServerLauncher>,
        cache: ToolCache,
        timeouts: Timeouts,
    ) -> Self {
        let fingerprint = fingerprint(&descriptor);
        Self {
            descriptor,
            fingerprint,
            launcher,
            cache,
            timeouts,
            state: Mutex::new(ToolkitState::Unstarted),
            connection: tokio::sync::Mutex::new(None),
            tools: RwLock::new(Vec::new()),
            read_only: false,
        }
    }

    /// Never write the capability cache, e.g. for `--list-tools`.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ToolkitState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tools exposed after exclusion filtering. Empty until `Ready`.
    pub fn tools(&self) -> Vec<ToolCapability> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: ToolkitState) -> ToolkitState {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = *guard;
        *guard = next;
        prev
    }

    /// Move `from → to` unless a close has started in the meantime.
    fn advance(&self, from: ToolkitState, to: ToolkitState) -> Result<(), AdapterError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard == from {
            *guard = to;
            Ok(())
        } else if guard.is_shutting_down() {
            Err(self.closed())
        } else {
            Err(self.not_ready(*guard))
        }
    }

    fn closed(&self) -> AdapterError {
        AdapterError::Closed {
            server: self.descriptor.name.clone(),
        }
    }

    fn not_ready(&self, state: ToolkitState) -> AdapterError {
        AdapterError::NotReady {
            server: self.descriptor.name.clone(),
            state: state.to_string(),
        }
    }

    /// Apply exclusions and confirmation flags to a raw capability list.
    fn apply_policy(&self, raw: Vec<ToolCapability>) -> Vec<ToolCapability> {
        raw.into_iter()
            .filter(|t| !self.descriptor.is_excluded(&t.name))
            .map(|mut t| {
                t.toolkit.clone_from(&self.descriptor.name);
                t.requires_confirmation = self.descriptor.needs_confirmation(&t.name);
                t
            })
            .collect()
    }

    /// Discover this server's tools, from the cache or live.
    ///
    /// `force_refresh` skips the cache lookup entirely. The cache always
    /// stores the unfiltered list so exclusion changes apply without a refresh.
    pub async fn initialize(
        &self,
        force_refresh: bool,
    ) -> Result<Vec<ToolCapability>, AdapterError> {
        match self.state() {
            ToolkitState::Unstarted => {}
            ToolkitState::Ready => return Ok(self.tools()),
            s if s.is_shutting_down() => return Err(self.closed()),
            s => return Err(self.not_ready(s)),
        }

        if !force_refresh {
            if let Some(entry) = self.cache.get(&self.fingerprint).await {
                let tools = self.apply_policy(entry.capabilities);
                *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools.clone();
                self.advance(ToolkitState::Unstarted, ToolkitState::Ready)?;
                tracing::info!(
                    name: "mcp.toolkit.ready",
                    server = %self.descriptor.name,
                    tool_count = tools.len(),
                    source = "cache",
                    "MCP toolkit ready"
                );
                return Ok(tools);
            }
        }

        match self.discover_live().await {
            Ok(tools) => Ok(tools),
            Err(e) => {
                if !self.state().is_shutting_down() {
                    self.set_state(ToolkitState::Failed);
                }
                self.release_connection().await;
                Err(e)
            }
        }
    }

    async fn discover_live(&self) -> Result<Vec<ToolCapability>, AdapterError> {
        self.advance(ToolkitState::Unstarted, ToolkitState::Launching)?;
        let conn = self.launch().await?;
        self.advance(ToolkitState::Launching, ToolkitState::Discovering)?;

        let raw = tokio::time::timeout(self.timeouts.discovery, conn.list_tools())
            .await
            .map_err(|_elapsed| AdapterError::DiscoveryTimeout {
                server: self.descriptor.name.clone(),
                timeout: self.timeouts.discovery,
            })?
            .map_err(|e| AdapterError::Discovery {
                server: self.descriptor.name.clone(),
                message: format!("{e:#}"),
            })?;

        if !self.read_only {
            if let Err(e) = self.cache.put(&self.fingerprint, &self.descriptor.name, &raw).await {
                tracing::warn!(server = %self.descriptor.name, error = %e, "Failed to write tool cache");
            }
        }

        let tools = self.apply_policy(raw);
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools.clone();
        self.advance(ToolkitState::Discovering, ToolkitState::Ready)?;

        tracing::info!(
            name: "mcp.toolkit.ready",
            server = %self.descriptor.name,
            tool_count = tools.len(),
            source = "live",
            "MCP toolkit ready"
        );
        Ok(tools)
    }

    /// Spawn the subprocess and store the handle.
    async fn launch(&self) -> Result<Arc<dyn ServerConnection>, AdapterError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }

        let conn = tokio::time::timeout(self.timeouts.discovery, self.launcher.launch(&self.descriptor))
            .await
            .map_err(|_elapsed| AdapterError::DiscoveryTimeout {
                server: self.descriptor.name.clone(),
                timeout: self.timeouts.discovery,
            })?
            .map_err(|e| AdapterError::Launch {
                server: self.descriptor.name.clone(),
                message: format!("{e:#}"),
            })?;

        if self.state().is_shutting_down() {
            conn.shutdown().await;
            return Err(self.closed());
        }

        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Call one of this server's tools.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, AdapterError> {
        match self.state() {
            ToolkitState::Ready => {}
            s if s.is_shutting_down() => return Err(self.closed()),
            s => return Err(self.not_ready(s)),
        }

        if !self.tools().iter().any(|t| t.name == tool) {
            return Err(AdapterError::Invocation {
                server: self.descriptor.name.clone(),
                tool: tool.to_string(),
                message: "unknown tool".to_string(),
            });
        }

        let conn = self.launch().await?;

        tracing::debug!(server = %self.descriptor.name, tool = %tool, "Invoking MCP tool");

        let outcome = tokio::time::timeout(self.timeouts.invocation, conn.call_tool(tool, arguments))
            .await
            .map_err(|_elapsed| AdapterError::InvocationTimeout {
                server: self.descriptor.name.clone(),
                tool: tool.to_string(),
                timeout: self.timeouts.invocation,
            })?;

        match outcome {
            Ok(result) if self.state().is_shutting_down() => {
                tracing::debug!(server = %self.descriptor.name, is_error = result.is_error, "Discarding result from closed toolkit");
                Err(self.closed())
            }
            Ok(result) => Ok(result),
            Err(_) if self.state().is_shutting_down() => Err(self.closed()),
            Err(e) => Err(AdapterError::Invocation {
                server: self.descriptor.name.clone(),
                tool: tool.to_string(),
                message: format!("{e:#}"),
            }),
        }
    }

    /// Terminate the subprocess. Idempotent and valid in every state.
    pub async fn close(&self) {
        let prev = self.set_state(ToolkitState::Closing);
        if prev == ToolkitState::Closed {
            self.set_state(ToolkitState::Closed);
            return;
        }

        self.release_connection().await;
        self.set_state(ToolkitState::Closed);
        tracing::debug!(server = %self.descriptor.name, previous = %prev, "MCP toolkit closed");
    }

    async fn release_connection(&self) {
        let conn = self.connection.lock().await.take();
        if let Some(conn) = conn {
            conn.shutdown().await;
        }
    }
}
