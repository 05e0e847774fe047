use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::llm::{LlmSettings, Provider};
use crate::mcp::config::{McpServerEntry, ServerDescriptor, resolve_descriptors};

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "mcp-server-config.json";

/// Config file looked up in the config directory.
pub const HOME_CONFIG_FILE: &str = "config.json";

/// Used when the config file has no `systemPrompt`.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant helping a software engineer. \
Your user is a professional software engineer who works on various programming projects. \
Today's date is {today_datetime}. Be concise and prefer using tools when they help. \
Save useful facts about the user with the memory tool.\n\n\
What you know about the user:\n{memories}";

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "llm",
    author,
    version,
    about = "Run LLM prompts with tools from MCP servers",
    long_about = "Run LLM prompts with tools from MCP servers.\n\n\
        Start the query with `c` to continue the previous conversation, or with \
        `p <template> [args...]` to use a prompt template. With no query, the \
        query is read from stdin."
)]
pub struct Cli {
    /// The query to process (default: read from stdin)
    pub query: Vec<String>,

    /// Config file path
    #[arg(short, long, env = "LLM_CONFIG")]
    pub config: Option<PathBuf>,

    /// List all available tools
    #[arg(long)]
    pub list_tools: bool,

    /// List all available prompt templates
    #[arg(long)]
    pub list_prompts: bool,

    /// Bypass tool confirmation requirements
    #[arg(long)]
    pub no_confirmations: bool,

    /// Force refresh of the tools capability cache
    #[arg(long)]
    pub force_refresh: bool,

    /// Print plain text instead of rendered markdown
    #[arg(long)]
    pub text_only: bool,

    /// Do not add any tools
    #[arg(long)]
    pub no_tools: bool,

    /// Show user memories
    #[arg(long)]
    pub show_memories: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config file found (looked in: {})", display_paths(searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid LLM settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("{0}")]
    Invalid(String),

    #[error("cannot determine the home directory")]
    NoHomeDir,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where the CLI keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
}

impl AppPaths {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `~/.llm`
    pub fn from_home() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::new(home.join(".llm")))
    }

    pub fn db_path(&self) -> PathBuf {
        self.config_dir.join("conversations.db")
    }

    pub fn tool_cache_dir(&self) -> PathBuf {
        self.config_dir.join("mcp-tools")
    }

    pub fn home_config_file(&self) -> PathBuf {
        self.config_dir.join(HOME_CONFIG_FILE)
    }
}

/// The `llm` section of the config file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub temperature: f32,
}

/// Layered view of the LLM settings: file section, then `LLM_` env vars.
#[derive(Debug, Deserialize)]
struct LlmLayer {
    llm: LlmConfig,
    /// `LLM_API_KEY`, used when the file sets no key.
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default, alias = "systemPrompt")]
    system_prompt: Option<String>,
    #[serde(default)]
    llm: serde_json::Value,
    #[serde(default, alias = "mcpServers")]
    mcp_servers: BTreeMap<String, McpServerEntry>,
    #[serde(default)]
    prompts: BTreeMap<String, String>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// File the configuration was read from.
    pub path: PathBuf,
    pub system_prompt: String,
    pub llm: LlmConfig,
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
    pub prompts: BTreeMap<String, String>,
}

impl AppConfig {
    /// Candidate config files, in lookup order.
    pub fn candidate_paths(explicit: Option<&Path>, paths: &AppPaths) -> Vec<PathBuf> {
        match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![paths.home_config_file(), PathBuf::from(LOCAL_CONFIG_FILE)],
        }
    }

    /// First existing candidate. An explicit path must exist.
    pub fn locate(explicit: Option<&Path>, paths: &AppPaths) -> Result<PathBuf, ConfigError> {
        let searched = Self::candidate_paths(explicit, paths);
        searched
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or(ConfigError::NotFound { searched })
    }

    /// Resolve and load the config for this invocation.
    pub fn load(cli: &Cli, paths: &AppPaths) -> Result<Self, ConfigError> {
        let path = Self::locate(cli.config.as_deref(), paths)?;
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        for (name, entry) in file.mcp_servers.iter().filter(|(_, e)| e.enabled) {
            entry
                .transport()
                .map_err(|e| ConfigError::Invalid(format!("mcpServers.{name}: {e}")))?;
        }

        let llm = Self::layer_llm(&file.llm)?;

        tracing::debug!(
            path = %path.display(),
            server_count = file.mcp_servers.len(),
            provider = %llm.provider,
            model = %llm.model,
            "Loaded config"
        );

        Ok(Self {
            path: path.to_path_buf(),
            system_prompt: file
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            llm,
            mcp_servers: file.mcp_servers,
            prompts: file.prompts,
        })
    }

    /// Defaults < file < `LLM_` environment variables.
    ///
    /// E.g. `LLM_LLM__MODEL=gpt-4o` overrides `llm.model`.
    fn layer_llm(section: &serde_json::Value) -> Result<LlmConfig, ConfigError> {
        let present: serde_json::Map<String, serde_json::Value> = section
            .as_object()
            .map(|m| {
                m.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut builder = Config::builder()
            .set_default("llm.provider", "openai")?
            .set_default("llm.model", "gpt-4o")?
            .set_default("llm.temperature", 0.0)?;
        if !present.is_empty() {
            let file_layer = serde_json::json!({ "llm": present }).to_string();
            builder = builder.add_source(File::from_str(&file_layer, FileFormat::Json));
        }

        let layered = builder
            .add_source(
                Environment::with_prefix("LLM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let LlmLayer { mut llm, api_key } = layered.try_deserialize()?;
        if llm.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            llm.api_key = api_key.filter(|k| !k.trim().is_empty());
        }
        if llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model cannot be empty".to_string()));
        }
        Ok(llm)
    }

    /// Launch descriptors for the enabled servers.
    pub fn server_descriptors(&self) -> Vec<ServerDescriptor> {
        resolve_descriptors(&self.mcp_servers)
    }

    /// Driver settings, with the base URL defaulted from the provider.
    pub fn llm_settings(&self) -> LlmSettings {
        let provider = Provider::from_name(&self.llm.provider, self.llm.base_url.as_deref());
        let base_url = self
            .llm
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| provider.default_base_url().to_string());

        LlmSettings {
            base_url,
            api_key: self.llm.api_key.clone(),
            model: self.llm.model.clone(),
            provider,
            temperature: self.llm.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_and_query_words() {
        let cli = Cli::try_parse_from([
            "llm",
            "--no-confirmations",
            "what",
            "is",
            "--text-only",
            "rust",
        ])
        .unwrap();
        assert_eq!(cli.query, vec!["what", "is", "rust"]);
        assert!(cli.no_confirmations);
        assert!(cli.text_only);
        assert!(!cli.force_refresh);
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let missing = dir.path().join("nope.json");

        let err = AppConfig::locate(Some(&missing), &paths).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_home_config_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        std::fs::write(paths.home_config_file(), "{}").unwrap();

        assert_eq!(
            AppConfig::locate(None, &paths).unwrap(),
            paths.home_config_file()
        );
    }

    #[test]
    fn test_state_paths() {
        let paths = AppPaths::new("/tmp/x/.llm");
        assert_eq!(paths.db_path(), PathBuf::from("/tmp/x/.llm/conversations.db"));
        assert_eq!(paths.tool_cache_dir(), PathBuf::from("/tmp/x/.llm/mcp-tools"));
    }
}
