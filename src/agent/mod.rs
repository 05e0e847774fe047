//! The agent loop and the controller that drives it for one turn.
//!
//! [`Agent`] turns a conversation state into a lazy stream of
//! [`AgentEvent`]s: fragments as they arrive from the model or the tools,
//! and a full [`AgentTurnState`] snapshot after every step. Tool calls only
//! run when the stream is polled past the snapshot that proposed them, so a
//! consumer that stops reading prevents them from running.
//!
//! [`TurnController`] consumes that stream, forwards fragments to an
//! [`OutputSink`], and asks a [`ConfirmationGate`] before tools that need
//! approval.

mod controller;
mod graph;
mod state;

pub use controller::{
    AutoApprove, ConfirmationGate, OutputSink, TurnController, TurnReport, rejected_tool_message,
};
pub use graph::{Agent, DEFAULT_RECURSION_LIMIT, render_system_prompt};
pub use state::{AgentEvent, AgentTurnState};

use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The model still wanted tools when no steps were left.
    #[error("agent stopped after {limit} steps without a final answer")]
    StepLimitExceeded { limit: usize },

    #[error("model request failed: {0}")]
    Driver(String),

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final answer.
    Completed,
    /// The user declined a tool call; nothing further ran.
    Rejected,
}
