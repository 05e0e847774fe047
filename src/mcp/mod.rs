//! Model Context Protocol (MCP) client side.
//!
//! Servers are launched as stdio subprocesses or reached over streamable
//! HTTP. Their tools are discovered (or read back from the capability cache)
//! and merged into one [`registry::ToolRegistry`].
//!
//! # Configuration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "fetch": {
//!       "command": "uvx",
//!       "args": ["mcp-server-fetch"]
//!     },
//!     "brave-search": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-brave-search"],
//!       "env": { "BRAVE_API_KEY": "${BRAVE_API_KEY}" },
//!       "requires_confirmation": ["brave_web_search"]
//!     },
//!     "docs": {
//!       "url": "https://mcp.example.com/mcp",
//!       "headers": { "Authorization": "Bearer ${DOCS_TOKEN}" }
//!     }
//!   }
//! }
//! ```
//!
//! # Tool Namespacing
//!
//! Tools are exposed to the model as `server__tool` (e.g. `fetch__fetch`),
//! sanitized to `[A-Za-z0-9_-]` and kept within 64 characters. In-process
//! tools use the `native` prefix.

pub mod cache;
pub mod config;
pub mod error;
pub mod launcher;
pub mod registry;
pub mod toolkit;
pub mod types;

pub use cache::ToolCache;
pub use config::{McpServerEntry, ServerDescriptor, ServerTransport};
pub use error::AdapterError;
pub use launcher::{RmcpLauncher, ServerConnection, ServerLauncher};
pub use registry::{LoadOptions, NativeTool, RegisteredTool, ToolAggregator, ToolRegistry};
pub use toolkit::{McpToolkit, Timeouts, ToolkitState};
pub use types::{ToolCapability, ToolResult};
