//! Server definitions and their resolution into launch descriptors.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("hardcoded env placeholder pattern is valid")
});

/// One entry of the `mcpServers` config map.
///
/// A local server sets `command` (and optionally `args`/`env`); a remote one
/// sets `url` (and optionally `headers`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct McpServerEntry {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Streamable HTTP endpoint of a remote server.
    #[serde(default)]
    pub url: Option<String>,
    /// Extra HTTP headers for a remote server, e.g. `Authorization`.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Tools hidden from the agent even when the server reports them.
    #[serde(default, alias = "excludeTools")]
    pub exclude_tools: Vec<String>,
    /// Tools that need an explicit yes before each call.
    #[serde(default, alias = "requiresConfirmation")]
    pub requires_confirmation: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl McpServerEntry {
    /// How to reach this server. Exactly one of `command` and `url` must be set.
    pub fn transport(&self) -> Result<ServerTransport, String> {
        match (&self.command, &self.url) {
            (Some(command), None) if !command.trim().is_empty() => Ok(ServerTransport::Stdio {
                command: command.clone(),
                args: self.args.clone(),
            }),
            (None, Some(url)) if !url.trim().is_empty() => Ok(ServerTransport::StreamableHttp {
                url: expand_env_placeholders(url),
                headers: expand_env_map(&self.headers),
            }),
            (Some(_), Some(_)) => Err("set either `command` or `url`, not both".to_string()),
            _ => Err("one of `command` or `url` is required".to_string()),
        }
    }
}

/// How a server is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTransport {
    /// Subprocess speaking MCP over stdin/stdout.
    Stdio { command: String, args: Vec<String> },
    /// Remote server over MCP streamable HTTP.
    StreamableHttp {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

/// Launch descriptor for one enabled MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: ServerTransport,
    /// Configured environment with placeholders expanded. The subprocess
    /// inherits the process environment; these values win over it.
    pub env: BTreeMap<String, String>,
    pub exclude_tools: BTreeSet<String>,
    pub requires_confirmation: BTreeSet<String>,
}

impl ServerDescriptor {
    /// A stdio descriptor with no env, exclusions or confirmations.
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(
            name,
            ServerTransport::Stdio {
                command: command.into(),
                args,
            },
        )
    }

    /// A streamable HTTP descriptor without extra headers.
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            ServerTransport::StreamableHttp {
                url: url.into(),
                headers: BTreeMap::new(),
            },
        )
    }

    fn with_transport(name: impl Into<String>, transport: ServerTransport) -> Self {
        Self {
            name: name.into(),
            transport,
            env: BTreeMap::new(),
            exclude_tools: BTreeSet::new(),
            requires_confirmation: BTreeSet::new(),
        }
    }

    pub fn is_excluded(&self, tool: &str) -> bool {
        self.exclude_tools.contains(tool)
    }

    pub fn needs_confirmation(&self, tool: &str) -> bool {
        self.requires_confirmation.contains(tool)
    }

    /// Command or URL, for logs and error messages.
    pub fn target(&self) -> &str {
        match &self.transport {
            ServerTransport::Stdio { command, .. } => command,
            ServerTransport::StreamableHttp { url, .. } => url,
        }
    }
}

/// Turn config entries into descriptors, skipping disabled servers.
///
/// Entries without a usable transport are skipped with a warning; the config
/// loader rejects them up front. The output is ordered by server name.
pub fn resolve_descriptors(servers: &BTreeMap<String, McpServerEntry>) -> Vec<ServerDescriptor> {
    servers
        .iter()
        .filter(|(name, entry)| {
            if !entry.enabled {
                tracing::debug!(server = %name, "Skipping disabled MCP server");
            }
            entry.enabled
        })
        .filter_map(|(name, entry)| {
            let transport = entry
                .transport()
                .map_err(|e| tracing::warn!(server = %name, error = %e, "Skipping MCP server"))
                .ok()?;
            Some(ServerDescriptor {
                name: name.clone(),
                transport,
                env: expand_env_map(&entry.env),
                exclude_tools: entry.exclude_tools.iter().cloned().collect(),
                requires_confirmation: entry.requires_confirmation.iter().cloned().collect(),
            })
        })
        .collect()
}

/// Expand `${VAR}` placeholders from the process environment.
///
/// Missing variables leave the placeholder unchanged.
pub fn expand_env_placeholders(input: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(input, |cap: &regex::Captures<'_>| {
            std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
        })
        .into_owned()
}

pub fn expand_env_map(map: &HashMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}
