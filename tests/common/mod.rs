//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::json;

use llm_mcp_cli::agent::{ConfirmationGate, OutputSink};
use llm_mcp_cli::llm::{DriverStream, LlmDriver, LlmRequest, ToolCall};
use llm_mcp_cli::mcp::{ServerConnection, ServerDescriptor, ServerLauncher, ToolCapability, ToolResult};
use llm_mcp_cli::normalized::NormalizedEvent;

/// Launches in-process servers keyed by descriptor name.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    servers: HashMap<String, Vec<String>>,
    failing: Vec<String>,
    pub launches: AtomicUsize,
    pub calls: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_server(mut self, name: &str, tools: &[&str]) -> Self {
        self.servers.insert(
            name.to_string(),
            tools.iter().map(ToString::to_string).collect(),
        );
        self
    }

    #[must_use]
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
    async fn launch(
        &self,
        descriptor: &ServerDescriptor,
    ) -> anyhow::Result<Arc<dyn ServerConnection>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&descriptor.name) {
            anyhow::bail!("command not found: {}", descriptor.target());
        }
        let tools = self
            .servers
            .get(&descriptor.name)
            .cloned()
            .unwrap_or_default();
        Ok(Arc::new(FakeConnection {
            server: descriptor.name.clone(),
            tools,
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct FakeConnection {
    server: String,
    tools: Vec<String>,
    calls: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

#[async_trait]
impl ServerConnection for FakeConnection {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolCapability>> {
        Ok(self
            .tools
            .iter()
            .map(|name| ToolCapability {
                toolkit: self.server.clone(),
                name: name.clone(),
                description: format!("{name} from {}", self.server),
                input_schema: json!({"type": "object", "properties": {}}),
                requires_confirmation: false,
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<ToolResult> {
        self.calls
            .lock()
            .unwrap()
            .push((format!("{}/{name}", self.server), arguments));
        Ok(ToolResult::success(json!(format!("{name} ok"))))
    }

    async fn shutdown(&self) {}
}

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// `(tool name, arguments json)` pairs.
    Tools(Vec<(String, String)>),
}

pub fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

pub fn tool(name: &str, args: &str) -> Reply {
    Reply::Tools(vec![(name.to_string(), args.to_string())])
}

/// Model that answers from a script and records every request.
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedDriver {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<DriverStream> {
        let step = self.requests.lock().unwrap().len();
        self.requests.lock().unwrap().push(req);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;

        let events: Vec<anyhow::Result<NormalizedEvent>> = match reply {
            Reply::Text(text) => {
                let chars: Vec<char> = text.chars().collect();
                let (a, b) = chars.split_at(chars.len() / 2);
                vec![
                    Ok(NormalizedEvent::MessageDelta { text: a.iter().collect() }),
                    Ok(NormalizedEvent::MessageDelta { text: b.iter().collect() }),
                    Ok(NormalizedEvent::Done),
                ]
            }
            Reply::Tools(calls) => calls
                .into_iter()
                .enumerate()
                .map(|(i, (name, args))| {
                    Ok(NormalizedEvent::ToolCallComplete {
                        call_index: i,
                        id: format!("call_{step}_{i}"),
                        name,
                        arguments_json: args,
                    })
                })
                .chain(std::iter::once(Ok(NormalizedEvent::Done)))
                .collect(),
        };
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Gate that answers a fixed way and counts how often it was asked.
#[derive(Debug)]
pub struct FixedGate {
    pub answer: bool,
    pub asked: AtomicUsize,
}

impl FixedGate {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            asked: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ConfirmationGate for FixedGate {
    async fn confirm(&self, _calls: &[ToolCall]) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

/// Sink that records everything it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<NormalizedEvent>,
    pub notices: Vec<String>,
    pub finished: usize,
}

impl RecordingSink {
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::MessageDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::ToolResult { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl OutputSink for RecordingSink {
    fn on_event(&mut self, event: &NormalizedEvent) {
        self.events.push(event.clone());
    }

    fn notice(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }

    fn finish(&mut self) {
        self.finished += 1;
    }
}
