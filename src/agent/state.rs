use crate::llm::{Message, ToolCall};
use crate::normalized::NormalizedEvent;

/// In-flight state of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurnState {
    /// Conversation so far, without the system prompt.
    pub messages: Vec<Message>,
    /// Set while the model runs its final allowed step.
    pub is_last_step: bool,
    pub today_datetime: String,
    pub memories: String,
}

impl AgentTurnState {
    pub fn new(
        messages: Vec<Message>,
        today_datetime: impl Into<String>,
        memories: impl Into<String>,
    ) -> Self {
        Self {
            messages,
            is_last_step: false,
            today_datetime: today_datetime.into(),
            memories: memories.into(),
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Tool calls proposed by the last message, if it is an assistant turn.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        self.last_message()
            .map(Message::pending_tool_calls)
            .unwrap_or_default()
    }
}

/// One item of the agent stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A fragment to render: text delta, tool call assembly, tool result.
    Message(NormalizedEvent),
    /// Full state after a model step or a tools step.
    Values(AgentTurnState),
}
