//! Server launch and the live MCP channel.
//!
//! [`ServerLauncher`] is the seam between a toolkit adapter and the actual
//! transport. [`RmcpLauncher`] either spawns the configured command and speaks
//! MCP over its stdin/stdout, or connects to a remote streamable HTTP
//! endpoint, both through `rmcp`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::{Peer, RoleClient, RunningService, ServiceExt},
    transport::{
        StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::process::Command;
use tokio::sync::Mutex;

use super::config::{ServerDescriptor, ServerTransport};
use super::types::{ToolCapability, ToolResult};

/// A live connection to one MCP server.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// Run capability discovery (`tools/list`, all pages).
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolCapability>>;

    /// Forward a `tools/call`.
    async fn call_tool(&self, name: &str, arguments: serde_json::Value)
    -> anyhow::Result<ToolResult>;

    /// Terminate the server and release the channel. Calls in flight fail.
    async fn shutdown(&self);
}

/// Starts MCP servers from their descriptors.
#[async_trait]
pub trait ServerLauncher: Send + Sync + std::fmt::Debug {
    async fn launch(
        &self,
        descriptor: &ServerDescriptor,
    ) -> anyhow::Result<Arc<dyn ServerConnection>>;
}

/// Launches servers with `rmcp`: child processes over stdio, or remote
/// servers over streamable HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmcpLauncher;

impl RmcpLauncher {
    async fn serve_stdio(
        descriptor: &ServerDescriptor,
        command: &str,
        args: &[String],
    ) -> anyhow::Result<RunningService<RoleClient, ()>> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(&descriptor.env)
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let transport = TokioChildProcess::new(cmd)
            .with_context(|| format!("failed to spawn '{command}'"))?;
        ().serve(transport)
            .await
            .with_context(|| format!("failed to connect stdio MCP server '{}'", descriptor.name))
    }

    async fn serve_http(
        descriptor: &ServerDescriptor,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> anyhow::Result<RunningService<RoleClient, ()>> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}' for '{}'", descriptor.name))?;
            // Values often carry secrets; keep them out of the error.
            let value = HeaderValue::from_str(value).with_context(|| {
                format!("invalid value for header '{name}' of '{}'", descriptor.name)
            })?;
            header_map.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .context("failed to build HTTP client")?;

        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(url),
        );
        ().serve(transport)
            .await
            .with_context(|| format!("failed to connect remote MCP server '{}'", descriptor.name))
    }
}

#[async_trait]
impl ServerLauncher for RmcpLauncher {
    async fn launch(
        &self,
        descriptor: &ServerDescriptor,
    ) -> anyhow::Result<Arc<dyn ServerConnection>> {
        let service = match &descriptor.transport {
            ServerTransport::Stdio { command, args } => {
                Self::serve_stdio(descriptor, command, args).await?
            }
            ServerTransport::StreamableHttp { url, headers } => {
                Self::serve_http(descriptor, url, headers).await?
            }
        };

        tracing::debug!(
            server = %descriptor.name,
            target = %descriptor.target(),
            "MCP server connected"
        );

        Ok(Arc::new(RmcpConnection {
            server: descriptor.name.clone(),
            service: Mutex::new(Some(service)),
        }))
    }
}

/// [`ServerConnection`] over an `rmcp` running client service.
struct RmcpConnection {
    server: String,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl RmcpConnection {
    async fn peer(&self) -> anyhow::Result<Peer<RoleClient>> {
        self.service
            .lock()
            .await
            .as_ref()
            .map(|svc| svc.peer().clone())
            .ok_or_else(|| anyhow::anyhow!("MCP server '{}' has been shut down", self.server))
    }
}

#[async_trait]
impl ServerConnection for RmcpConnection {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolCapability>> {
        let tools = self
            .peer()
            .await?
            .list_all_tools()
            .await
            .with_context(|| format!("tools/list failed for MCP server '{}'", self.server))?;

        Ok(tools
            .iter()
            .map(|t| ToolCapability::from_remote(&self.server, t))
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<ToolResult> {
        let res = self
            .peer()
            .await?
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .with_context(|| format!("tools/call failed for {}::{name}", self.server))?;

        let value = serde_json::to_value(res)?;
        let is_error = value
            .get("isError")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let content = value.get("content").cloned().unwrap_or(value);

        Ok(ToolResult {
            content,
            is_error,
        })
    }

    async fn shutdown(&self) {
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            if let Err(e) = service.cancel().await {
                tracing::warn!(server = %self.server, error = %e, "MCP service did not stop cleanly");
            }
        }
    }
}
