//! ReAct-style agent loop.
//!
//! Each iteration is a model step followed, when the model asked for tools,
//! by a tools step. Both count against the recursion limit:
//!
//! 1. Send the system prompt plus history to the model, streaming fragments
//! 2. Emit a snapshot with the assistant message appended
//! 3. On the next poll, execute the proposed tool calls and emit their results
//! 4. Emit a snapshot with the tool messages appended and go back to 1

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use uuid::Uuid;

use super::{AgentError, AgentEvent, AgentTurnState};
use crate::llm::{LlmDriver, LlmRequest, Message, MessageRole, ToolCall};
use crate::mcp::registry::ToolRegistry;
use crate::normalized::NormalizedEvent;

/// Steps allowed per turn. A model call and a tools phase are one step each.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Fill `{today_datetime}` and `{memories}` in a system prompt template.
pub fn render_system_prompt(template: &str, state: &AgentTurnState) -> String {
    template
        .replace("{today_datetime}", &state.today_datetime)
        .replace("{memories}", &state.memories)
}

/// Wire form of a history message.
fn request_message(msg: &Message) -> serde_json::Value {
    let mut value = serde_json::to_value(msg).unwrap_or_default();
    if msg.role == MessageRole::Assistant && msg.content.is_empty() && msg.tool_calls.is_some() {
        value["content"] = serde_json::Value::Null;
    }
    value
}

/// The model plus its tools, ready to run turns.
#[derive(Clone)]
pub struct Agent {
    driver: Arc<dyn LlmDriver>,
    tools: ToolRegistry,
    system_prompt: String,
    recursion_limit: usize,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("tools", &self.tools)
            .field("recursion_limit", &self.recursion_limit)
            .finish()
    }
}

impl Agent {
    pub fn new(driver: Arc<dyn LlmDriver>, tools: ToolRegistry, system_prompt: impl Into<String>) -> Self {
        Self {
            driver,
            tools,
            system_prompt: system_prompt.into(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit.max(1);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the loop from `state`. The stream is lazy and cannot be restarted.
    #[allow(clippy::too_many_lines)]
    pub fn stream(
        &self,
        state: AgentTurnState,
    ) -> impl Stream<Item = Result<AgentEvent, AgentError>> + Send + 'static {
        let agent = self.clone();
        let request_id = Uuid::new_v4().to_string();
        let tools = agent.tools.openai_tools_json();

        tracing::info!(
            request_id = %request_id,
            message_count = state.messages.len(),
            tool_count = tools.len(),
            recursion_limit = agent.recursion_limit,
            "Starting agent turn"
        );

        async_stream::try_stream! {
            let mut state = state;
            let mut step = 0usize;

            loop {
                step += 1;
                // No room left for a tools step plus the model step after it.
                state.is_last_step = step + 1 >= agent.recursion_limit;

                tracing::info!(
                    request_id = %request_id,
                    iteration = step,
                    message_count = state.messages.len(),
                    "Starting model step"
                );

                let mut messages = Vec::with_capacity(state.messages.len() + 1);
                messages.push(serde_json::json!({
                    "role": "system",
                    "content": render_system_prompt(&agent.system_prompt, &state),
                }));
                messages.extend(state.messages.iter().map(request_message));

                let req = LlmRequest {
                    messages,
                    tools: tools.clone(),
                };

                let mut driver_stream = agent
                    .driver
                    .stream(req)
                    .await
                    .map_err(|e| AgentError::Driver(format!("{e:#}")))?;

                let mut accumulators: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
                let mut assistant_text = String::new();

                while let Some(result) = driver_stream.next().await {
                    let event = result.map_err(|e| AgentError::Driver(format!("{e:#}")))?;
                    match &event {
                        NormalizedEvent::MessageDelta { text } => {
                            assistant_text.push_str(text);
                        }
                        NormalizedEvent::ToolCallDelta {
                            call_index,
                            id,
                            name,
                            arguments_delta,
                        } => {
                            let acc = accumulators.entry(*call_index).or_default();
                            if acc.id.is_none() {
                                acc.id.clone_from(id);
                            }
                            if acc.name.is_none() {
                                acc.name.clone_from(name);
                            }
                            if let Some(delta) = arguments_delta {
                                acc.arguments.push_str(delta);
                            }
                        }
                        NormalizedEvent::ToolCallComplete {
                            call_index,
                            id,
                            name,
                            arguments_json,
                        } => {
                            let acc = accumulators.entry(*call_index).or_default();
                            acc.id = Some(id.clone());
                            acc.name = Some(name.clone());
                            acc.arguments.clone_from(arguments_json);
                        }
                        NormalizedEvent::Error { message, code } => {
                            tracing::error!(
                                request_id = %request_id,
                                iteration = step,
                                error = %message,
                                code = ?code,
                                "Model stream reported an error"
                            );
                            Err(AgentError::Driver(message.clone()))?;
                        }
                        NormalizedEvent::Done => continue,
                        NormalizedEvent::ToolResult { .. } => {}
                    }
                    yield AgentEvent::Message(event);
                }

                let tool_calls: Vec<ToolCall> = accumulators
                    .into_values()
                    .filter_map(|acc| Some(ToolCall::function(acc.id?, acc.name?, acc.arguments)))
                    .collect();

                if tool_calls.is_empty() {
                    state.messages.push(Message::assistant(assistant_text));
                    tracing::info!(
                        request_id = %request_id,
                        iteration = step,
                        "Final answer produced"
                    );
                    yield AgentEvent::Values(state);
                    break;
                }

                if state.is_last_step {
                    tracing::warn!(
                        request_id = %request_id,
                        iteration = step,
                        tool_call_count = tool_calls.len(),
                        "Tool calls proposed on the last step"
                    );
                    Err(AgentError::StepLimitExceeded {
                        limit: agent.recursion_limit,
                    })?;
                }

                for (idx, tc) in tool_calls.iter().enumerate() {
                    tracing::info!(
                        request_id = %request_id,
                        iteration = step,
                        tool_index = idx,
                        tool_id = %tc.id,
                        tool_name = %tc.function.name,
                        args_length = tc.function.arguments.len(),
                        "Tool call proposed"
                    );
                }

                state
                    .messages
                    .push(Message::assistant_with_tool_calls(assistant_text, tool_calls.clone()));
                // Tools run only if the consumer keeps polling past this snapshot.
                yield AgentEvent::Values(state.clone());

                step += 1;
                for tool_call in &tool_calls {
                    let name = &tool_call.function.name;
                    let result = match serde_json::from_str::<serde_json::Value>(
                        if tool_call.function.arguments.trim().is_empty() {
                            "{}"
                        } else {
                            &tool_call.function.arguments
                        },
                    ) {
                        Ok(arguments) => agent.tools.invoke(name, arguments).await,
                        Err(e) => crate::mcp::ToolResult::error(format!("invalid tool arguments: {e}")),
                    };

                    tracing::info!(
                        request_id = %request_id,
                        iteration = step,
                        tool_id = %tool_call.id,
                        tool_name = %name,
                        is_error = result.is_error,
                        "Tool call finished"
                    );

                    let content = result.to_model_content();
                    yield AgentEvent::Message(NormalizedEvent::ToolResult {
                        id: tool_call.id.clone(),
                        name: name.clone(),
                        content: content.clone(),
                        success: !result.is_error,
                    });
                    state.messages.push(Message::tool_result(tool_call.id.clone(), content));
                }

                yield AgentEvent::Values(state.clone());
            }
        }
    }
}
