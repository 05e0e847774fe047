use serde::{Deserialize, Serialize};

/// One tool discovered on an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Name of the server (toolkit) exposing the tool.
    pub toolkit: String,
    /// Tool name as the server knows it.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool's arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl ToolCapability {
    /// Build a capability from an rmcp tool listing.
    pub fn from_remote(toolkit: &str, tool: &rmcp::model::Tool) -> Self {
        let input_schema = serde_json::to_value(&*tool.input_schema)
            .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));

        Self {
            toolkit: toolkit.to_string(),
            name: tool.name.to_string(),
            description: tool.description.as_deref().unwrap_or("").to_string(),
            input_schema,
            requires_confirmation: false,
        }
    }
}

/// Result of a tool call, as handed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: serde_json::Value,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: serde_json::Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: serde_json::Value::String(message.into()),
            is_error: true,
        }
    }

    /// Text form sent to the model as the tool message content.
    pub fn to_model_content(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
