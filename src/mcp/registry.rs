use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;

use super::cache::ToolCache;
use super::config::ServerDescriptor;
use super::launcher::ServerLauncher;
use super::toolkit::{McpToolkit, Timeouts};
use super::types::{ToolCapability, ToolResult};

/// A tool implemented in-process rather than by an MCP server.
#[async_trait]
pub trait NativeTool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> serde_json::Value;
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// Toolkit label used for in-process tools.
pub const NATIVE_TOOLKIT: &str = "native";

/// What a qualified tool name dispatches to.
#[derive(Debug, Clone)]
pub enum RegisteredTool {
    Builtin(Arc<dyn NativeTool>),
    Remote {
        toolkit: Arc<McpToolkit>,
        capability: ToolCapability,
    },
}

impl RegisteredTool {
    pub fn toolkit_name(&self) -> &str {
        match self {
            Self::Builtin(_) => NATIVE_TOOLKIT,
            Self::Remote { toolkit, .. } => toolkit.name(),
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::Builtin(tool) => tool.name(),
            Self::Remote { capability, .. } => &capability.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Builtin(tool) => tool.description(),
            Self::Remote { capability, .. } => &capability.description,
        }
    }

    pub fn schema(&self) -> serde_json::Value {
        match self {
            Self::Builtin(tool) => tool.schema(),
            Self::Remote { capability, .. } => capability.input_schema.clone(),
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        match self {
            Self::Builtin(_) => false,
            Self::Remote { capability, .. } => capability.requires_confirmation,
        }
    }
}

/// A server that did not make it to `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolkitFailure {
    pub server: String,
    pub error: String,
}

/// The merged tool set handed to the agent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    // (qualified_name, tool), sorted by (toolkit, tool) with builtins last
    tools: Arc<Vec<(String, RegisteredTool)>>,
    index: Arc<HashMap<String, usize>>,
    toolkits: Arc<Vec<Arc<McpToolkit>>>,
    failures: Arc<Vec<ToolkitFailure>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.len())
            .field("toolkit_count", &self.toolkits.len())
            .field("failure_count", &self.failures.len())
            .finish()
    }
}

impl ToolRegistry {
    /// A registry with no tools at all.
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Sanitize tool names for `OpenAI` API compatibility.
    pub fn sanitize_tool_name(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Longest function name the chat-completions API accepts.
    pub const MAX_TOOL_NAME_LEN: usize = 64;

    /// Shorten an over-long name, keeping it distinct with a hash suffix.
    fn fit_name(name: String) -> String {
        if name.len() <= Self::MAX_TOOL_NAME_LEN {
            return name;
        }
        let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
        // Sanitized names are ASCII, so byte slicing is safe.
        let keep = Self::MAX_TOOL_NAME_LEN - 9;
        format!("{}_{}", &name[..keep], &digest[..8])
    }

    fn unique_name(&self, base: String) -> String {
        let base = Self::fit_name(base);
        if !self.index.contains_key(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = Self::fit_name(format!("{base}_{n}"));
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn push(&mut self, tool: RegisteredTool) -> String {
        let base = Self::sanitize_tool_name(&format!(
            "{}__{}",
            tool.toolkit_name(),
            tool.tool_name()
        ));
        let name = self.unique_name(base);

        // Copies only when a clone of this registry is still alive.
        let tools = Arc::make_mut(&mut self.tools);
        Arc::make_mut(&mut self.index).insert(name.clone(), tools.len());
        tools.push((name.clone(), tool));
        name
    }

    /// Add an in-process tool, namespaced as `native__<name>`.
    #[must_use]
    pub fn with_native_tool(mut self, tool: Arc<dyn NativeTool>) -> Self {
        self.push(RegisteredTool::Builtin(tool));
        self
    }

    /// `(qualified_name, tool)` pairs in listing order.
    pub fn tools(&self) -> &[(String, RegisteredTool)] {
        &self.tools
    }

    pub fn get(&self, qualified_name: &str) -> Option<&RegisteredTool> {
        self.index.get(qualified_name).map(|&i| &self.tools[i].1)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Servers that failed to initialize during aggregation.
    pub fn failures(&self) -> &[ToolkitFailure] {
        &self.failures
    }

    pub fn toolkits(&self) -> &[Arc<McpToolkit>] {
        &self.toolkits
    }

    /// Unknown names never require confirmation; they fail at dispatch.
    pub fn requires_confirmation(&self, qualified_name: &str) -> bool {
        self.get(qualified_name)
            .is_some_and(RegisteredTool::requires_confirmation)
    }

    pub fn openai_tools_json(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool.description(),
                        "parameters": tool.schema()
                    }
                })
            })
            .collect()
    }

    /// Execute a qualified tool, e.g. `fetch__fetch` or `native__save_memory`.
    ///
    /// Failures are returned as an error result for the model, never as `Err`.
    pub async fn invoke(&self, qualified_name: &str, arguments: serde_json::Value) -> ToolResult {
        let Some(tool) = self.get(qualified_name) else {
            return ToolResult::error(format!("unknown tool: {qualified_name}"));
        };

        let outcome = match tool {
            RegisteredTool::Builtin(native) => native
                .call(arguments)
                .await
                .map(ToolResult::success)
                .map_err(|e| format!("{e:#}")),
            RegisteredTool::Remote {
                toolkit,
                capability,
            } => toolkit
                .invoke(&capability.name, arguments)
                .await
                .map_err(|e| e.to_string()),
        };

        outcome.unwrap_or_else(|message| {
            tracing::warn!(tool = %qualified_name, error = %message, "Tool call failed");
            ToolResult::error(message)
        })
    }

    /// Close every toolkit concurrently.
    pub async fn close_all(&self) {
        futures::future::join_all(self.toolkits.iter().map(|tk| tk.close())).await;
    }
}

/// Options for one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Ignore cached capability lists.
    pub force_refresh: bool,
    /// Skip all servers and builtins.
    pub no_tools: bool,
    /// Do not write discovery results to the capability cache.
    pub read_only: bool,
}

/// Brings up every configured server and merges their tools.
#[derive(Debug, Clone)]
pub struct ToolAggregator {
    launcher: Arc<dyn ServerLauncher>,
    cache: ToolCache,
    timeouts: Timeouts,
}

impl ToolAggregator {
    pub fn new(launcher: Arc<dyn ServerLauncher>, cache: ToolCache) -> Self {
        Self {
            launcher,
            cache,
            timeouts: Timeouts::default(),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Initialize all servers concurrently and build the registry.
    ///
    /// Returns once every server is `Ready` or has failed. A failing or
    /// panicking server is closed, logged and recorded in
    /// [`ToolRegistry::failures`]; the others are unaffected.
    pub async fn load_all(
        &self,
        descriptors: Vec<ServerDescriptor>,
        options: LoadOptions,
        builtins: Vec<Arc<dyn NativeTool>>,
    ) -> ToolRegistry {
        if options.no_tools {
            tracing::info!("Tools disabled; skipping MCP servers");
            return ToolRegistry::new_empty();
        }

        let mut set = JoinSet::new();
        let mut by_task = HashMap::new();

        for descriptor in descriptors {
            let mut toolkit = McpToolkit::new(
                descriptor,
                Arc::clone(&self.launcher),
                self.cache.clone(),
                self.timeouts,
            );
            if options.read_only {
                toolkit = toolkit.read_only();
            }
            let toolkit = Arc::new(toolkit);
            let task_toolkit = Arc::clone(&toolkit);
            let handle = set.spawn(async move {
                let result = task_toolkit.initialize(options.force_refresh).await;
                (task_toolkit, result)
            });
            by_task.insert(handle.id(), toolkit);
        }

        let mut ready = Vec::new();
        let mut failures = Vec::new();

        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, (toolkit, Ok(tools)))) => ready.push((toolkit, tools)),
                Ok((_, (toolkit, Err(e)))) => {
                    tracing::warn!(
                        name: "mcp.toolkit.failed",
                        server = %toolkit.name(),
                        error = %e,
                        "MCP server unavailable, continuing without it"
                    );
                    toolkit.close().await;
                    failures.push(ToolkitFailure {
                        server: toolkit.name().to_string(),
                        error: e.to_string(),
                    });
                }
                Err(join_err) => {
                    let Some(toolkit) = by_task.get(&join_err.id()) else {
                        tracing::error!(error = %join_err, "Lost track of a toolkit task");
                        continue;
                    };
                    tracing::error!(
                        name: "mcp.toolkit.failed",
                        server = %toolkit.name(),
                        error = %join_err,
                        "MCP toolkit task aborted"
                    );
                    toolkit.close().await;
                    failures.push(ToolkitFailure {
                        server: toolkit.name().to_string(),
                        error: join_err.to_string(),
                    });
                }
            }
        }

        ready.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        failures.sort_by(|a, b| a.server.cmp(&b.server));

        let mut registry = ToolRegistry::new_empty();
        let mut toolkits = Vec::with_capacity(ready.len());
        for (toolkit, mut tools) in ready {
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            for capability in tools {
                registry.push(RegisteredTool::Remote {
                    toolkit: Arc::clone(&toolkit),
                    capability,
                });
            }
            toolkits.push(toolkit);
        }
        registry.toolkits = Arc::new(toolkits);
        registry.failures = Arc::new(failures);

        for tool in builtins {
            registry = registry.with_native_tool(tool);
        }

        tracing::info!(
            name: "mcp.registry.loaded",
            tool_count = registry.len(),
            toolkit_count = registry.toolkits.len(),
            failed = registry.failures.len(),
            "Tool registry ready"
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl NativeTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the arguments"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            Ok(args)
        }
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl NativeTool for Broken {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn call(&self, _args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_sanitize_tool_name() {
        assert_eq!(ToolRegistry::sanitize_tool_name("time::now"), "time__now");
        assert_eq!(ToolRegistry::sanitize_tool_name("a.b-c_d"), "a_b-c_d");
    }

    #[tokio::test]
    async fn test_native_tool_dispatch() {
        let registry = ToolRegistry::new_empty().with_native_tool(Arc::new(Echo));
        assert_eq!(registry.tools()[0].0, "native__echo");

        let result = registry
            .invoke("native__echo", serde_json::json!({"x": 1}))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_failures_become_error_results() {
        let registry = ToolRegistry::new_empty().with_native_tool(Arc::new(Broken));

        let result = registry.invoke("native__echo", serde_json::json!({})).await;
        assert!(result.is_error);
        assert!(result.to_model_content().contains("disk full"));

        let result = registry.invoke("nope__nothing", serde_json::json!({})).await;
        assert!(result.is_error);
    }

    #[test]
    fn test_name_collisions_get_suffixes() {
        let registry = ToolRegistry::new_empty()
            .with_native_tool(Arc::new(Echo))
            .with_native_tool(Arc::new(Broken));
        let names: Vec<_> = registry.tools().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["native__echo", "native__echo_2"]);
    }

    #[test]
    fn test_openai_tools_json_shape() {
        let registry = ToolRegistry::new_empty().with_native_tool(Arc::new(Echo));
        let json = registry.openai_tools_json();
        assert_eq!(json[0]["type"], "function");
        assert_eq!(json[0]["function"]["name"], "native__echo");
        assert_eq!(json[0]["function"]["description"], "Echo the arguments");
        assert!(!registry.requires_confirmation("native__echo"));
    }

    #[test]
    fn test_long_names_fit_the_api_limit() {
        #[derive(Debug)]
        struct Long(&'static str);

        #[async_trait]
        impl NativeTool for Long {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                ""
            }
            fn schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
                Ok(args)
            }
        }

        let long = "summarize_the_repository_contents_and_write_a_detailed_report_a";
        let other = "summarize_the_repository_contents_and_write_a_detailed_report_b";
        let registry = ToolRegistry::new_empty()
            .with_native_tool(Arc::new(Long(long)))
            .with_native_tool(Arc::new(Long(other)))
            .with_native_tool(Arc::new(Long(long)));

        let names: Vec<&str> = registry.tools().iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.iter().all(|n| n.len() <= ToolRegistry::MAX_TOOL_NAME_LEN));
        assert!(names.iter().all(|n| n.starts_with("native__summarize_the_repository")));
        assert_ne!(names[0], names[1]);
        assert_ne!(names[0], names[2]);
        assert_ne!(names[1], names[2]);

        assert!(registry.get(names[1]).is_some());
        assert_eq!(registry.get(names[2]).unwrap().tool_name(), long);
    }

    #[test]
    fn test_short_names_are_untouched() {
        assert_eq!(ToolRegistry::fit_name("fetch__fetch".to_string()), "fetch__fetch");
        let exact = "a".repeat(ToolRegistry::MAX_TOOL_NAME_LEN);
        assert_eq!(ToolRegistry::fit_name(exact.clone()), exact);
    }
}
