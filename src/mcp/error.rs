use std::time::Duration;

/// Errors raised by a single MCP toolkit adapter.
///
/// Every variant is scoped to one server; the aggregator logs it and keeps
/// going with the remaining servers.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The server subprocess could not be spawned or failed the handshake.
    #[error("failed to launch MCP server '{server}': {message}")]
    Launch { server: String, message: String },

    /// `tools/list` failed after a successful launch.
    #[error("tool discovery failed for MCP server '{server}': {message}")]
    Discovery { server: String, message: String },

    /// Discovery did not finish within its deadline.
    #[error("tool discovery for MCP server '{server}' timed out after {timeout:?}")]
    DiscoveryTimeout { server: String, timeout: Duration },

    /// A tool call produced no response within the idle-stream deadline.
    #[error("call to '{server}::{tool}' timed out after {timeout:?}")]
    InvocationTimeout {
        server: String,
        tool: String,
        timeout: Duration,
    },

    /// The server answered the call with a protocol-level error.
    #[error("call to '{server}::{tool}' failed: {message}")]
    Invocation {
        server: String,
        tool: String,
        message: String,
    },

    /// The adapter has not finished discovery.
    #[error("MCP server '{server}' is not ready (state: {state})")]
    NotReady { server: String, state: String },

    /// The adapter was closed, possibly while a call was in flight.
    #[error("MCP server '{server}' is closed")]
    Closed { server: String },
}

/// Errors raised while reading the tool capability cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
