use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::mcp::registry::NativeTool;
use crate::storage::{MemoryRecord, PersistenceLayer, StoreError};

/// Text injected into the system prompt when nothing is stored.
pub const NO_MEMORIES: &str = "no memories";

/// Lets the model file away facts about the user.
#[derive(Debug)]
pub struct SaveMemoryTool {
    persistence: Arc<dyn PersistenceLayer>,
    namespace: String,
}

impl SaveMemoryTool {
    pub fn new(persistence: Arc<dyn PersistenceLayer>, namespace: impl Into<String>) -> Self {
        Self {
            persistence,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl NativeTool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Save the given memory for the current user. Do not save duplicate memories."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "memories": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Facts to remember about the user."
                }
            },
            "required": ["memories"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let memories: Vec<String> = args["memories"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Missing memories"))?
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        if memories.is_empty() {
            anyhow::bail!("No memories to save");
        }

        self.persistence
            .append_memories(&self.namespace, &memories)
            .await?;

        tracing::info!(count = memories.len(), "Saved memories");
        Ok(json!({
            "status": "success",
            "saved": memories.len()
        }))
    }
}

/// Render stored memories as `- fact` lines, or [`NO_MEMORIES`].
pub fn format_memories(records: &[MemoryRecord]) -> String {
    if records.is_empty() {
        return NO_MEMORIES.to_string();
    }
    records
        .iter()
        .map(|m| format!("- {}", m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Memory snippet for the system prompt.
pub async fn memory_snippet(
    persistence: &dyn PersistenceLayer,
    namespace: &str,
) -> Result<String, StoreError> {
    let records = persistence.list_memories(namespace).await?;
    Ok(format_memories(&records))
}
