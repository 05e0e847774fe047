//! Command-line LLM agent that uses tools from MCP servers.
//!
//! A query is answered by a ReAct-style loop over an OpenAI-compatible chat
//! model, with tools discovered from MCP servers launched as subprocesses.
//! Conversations and user memories persist between invocations in `SQLite`.
//!
//! # Architecture
//!
//! - **Config**: JSON config file layered with `LLM_` environment variables
//! - **MCP**: concurrent toolkit start-up, capability cache, merged registry
//! - **Agent**: lazy event stream with confirmation-gated tool execution
//! - **Session**: thread identity and per-turn checkpoints
//!
//! # Modules
//!
//! - [`agent`]: Agent loop and turn controller
//! - [`app`]: One CLI invocation end to end
//! - [`config`]: CLI flags, config file and state paths
//! - [`llm`]: LLM driver trait and implementations
//! - [`mcp`]: MCP client, capability cache and tool registry
//! - [`normalized`]: Unified streaming event model
//! - [`output`]: Terminal rendering and confirmation prompt
//! - [`prompt`]: Query parsing and prompt templates
//! - [`session`]: Conversation thread management
//! - [`storage`]: `SQLite` persistence
//! - [`tools`]: Built-in tools

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod agent;
pub mod app;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod normalized;
pub mod output;
pub mod prompt;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod tools;
