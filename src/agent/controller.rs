use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use super::{AgentError, AgentEvent, AgentTurnState, TurnOutcome};
use crate::llm::{Message, ToolCall};
use crate::mcp::registry::ToolRegistry;
use crate::normalized::NormalizedEvent;

/// Tool content recorded for a call the user declined.
const REJECTED_CONTENT: &str = "The user declined to run this tool.";

/// Asks whether proposed tool calls may run.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// `true` to run all of `calls`, `false` to stop the turn.
    async fn confirm(&self, calls: &[ToolCall]) -> bool;
}

/// Approves everything without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationGate for AutoApprove {
    async fn confirm(&self, _calls: &[ToolCall]) -> bool {
        true
    }
}

/// Where a turn's output goes.
pub trait OutputSink: Send {
    /// Render one fragment. Called in production order.
    fn on_event(&mut self, event: &NormalizedEvent);

    /// Out-of-band status line, e.g. a declined tool call.
    fn notice(&mut self, text: &str);

    /// Flush and tear down. Called exactly once per turn.
    fn finish(&mut self);
}

/// What a turn left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Last state to checkpoint; `None` if the stream ended before any step.
    pub state: Option<AgentTurnState>,
}

/// Tool message recorded in place of a declined call's result.
pub fn rejected_tool_message(call: &ToolCall) -> Message {
    Message::tool_result(call.id.clone(), REJECTED_CONTENT)
}

/// Drives one agent stream to completion for display.
#[derive(Clone)]
pub struct TurnController {
    tools: ToolRegistry,
    gate: Arc<dyn ConfirmationGate>,
    confirmations: bool,
}

impl std::fmt::Debug for TurnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnController")
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

impl TurnController {
    pub fn new(tools: ToolRegistry, gate: Arc<dyn ConfirmationGate>) -> Self {
        Self {
            tools,
            gate,
            confirmations: true,
        }
    }

    /// Skip the gate entirely (`--no-confirmations`).
    #[must_use]
    pub fn without_confirmations(mut self) -> Self {
        self.confirmations = false;
        self
    }

    /// Consume `events`, rendering into `sink`.
    ///
    /// `sink.finish()` runs before this returns, whatever the outcome.
    pub async fn run<S>(
        &self,
        events: S,
        sink: &mut dyn OutputSink,
    ) -> Result<TurnReport, AgentError>
    where
        S: Stream<Item = Result<AgentEvent, AgentError>> + Send,
    {
        let result = self.dispatch(events, sink).await;
        sink.finish();
        result
    }

    async fn dispatch<S>(
        &self,
        events: S,
        sink: &mut dyn OutputSink,
    ) -> Result<TurnReport, AgentError>
    where
        S: Stream<Item = Result<AgentEvent, AgentError>> + Send,
    {
        futures::pin_mut!(events);
        let mut last = None;

        while let Some(item) = events.next().await {
            match item? {
                AgentEvent::Message(event) => sink.on_event(&event),
                AgentEvent::Values(state) => {
                    if self.confirmations && !self.approve(&state).await {
                        let calls = state.pending_tool_calls().to_vec();
                        tracing::info!(tool_call_count = calls.len(), "Tool calls declined");
                        sink.notice("Tool call rejected; stopping here.");

                        let mut state = state;
                        state
                            .messages
                            .extend(calls.iter().map(rejected_tool_message));
                        return Ok(TurnReport {
                            outcome: TurnOutcome::Rejected,
                            state: Some(state),
                        });
                    }
                    last = Some(state);
                }
            }
        }

        Ok(TurnReport {
            outcome: TurnOutcome::Completed,
            state: last,
        })
    }

    /// Ask the gate about calls that need it; others pass through.
    async fn approve(&self, state: &AgentTurnState) -> bool {
        let gated: Vec<ToolCall> = state
            .pending_tool_calls()
            .iter()
            .filter(|call| self.tools.requires_confirmation(&call.function.name))
            .cloned()
            .collect();

        if gated.is_empty() {
            return true;
        }
        self.gate.confirm(&gated).await
    }
}
