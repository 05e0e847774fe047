//! In-process tools registered alongside MCP tools.

pub mod memory;

pub use memory::{SaveMemoryTool, format_memories, memory_snippet};
