mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use common::FakeLauncher;
use llm_mcp_cli::app;
use llm_mcp_cli::config::{AppConfig, AppPaths, Cli};
use llm_mcp_cli::mcp::config::resolve_descriptors;
use llm_mcp_cli::mcp::{
    LoadOptions, McpServerEntry, NativeTool, ServerDescriptor, ToolAggregator, ToolCache,
    ToolkitState,
};
use llm_mcp_cli::storage::{DEFAULT_MEMORY_NAMESPACE, PersistenceLayer, SqliteStore};
use llm_mcp_cli::tools::SaveMemoryTool;

fn entry(command: &str) -> McpServerEntry {
    serde_json::from_value(json!({ "command": command })).unwrap()
}

fn aggregator(launcher: &Arc<FakeLauncher>, cache_dir: &std::path::Path) -> ToolAggregator {
    ToolAggregator::new(launcher.clone(), ToolCache::new(cache_dir))
}

fn names(registry: &llm_mcp_cli::mcp::ToolRegistry) -> Vec<String> {
    registry.tools().iter().map(|(n, _)| n.clone()).collect()
}

#[tokio::test]
async fn test_two_servers_are_merged_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with_server("fetch", &["fetch"])
            .with_server("brave-search", &["brave_web_search", "brave_local_search"]),
    );

    let mut servers = BTreeMap::new();
    servers.insert("fetch".to_string(), entry("uvx"));
    servers.insert("brave-search".to_string(), entry("npx"));

    let registry = aggregator(&launcher, dir.path())
        .load_all(resolve_descriptors(&servers), LoadOptions::default(), vec![])
        .await;

    assert_eq!(
        names(&registry),
        vec![
            "brave-search__brave_local_search",
            "brave-search__brave_web_search",
            "fetch__fetch",
        ]
    );
    assert!(registry.failures().is_empty());
    assert!(
        registry
            .toolkits()
            .iter()
            .all(|t| t.state() == ToolkitState::Ready)
    );

    registry.close_all().await;
    assert!(
        registry
            .toolkits()
            .iter()
            .all(|t| t.state() == ToolkitState::Closed)
    );
}

#[tokio::test]
async fn test_failing_server_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with_server("fetch", &["fetch"])
            .failing("broken"),
    );

    let registry = aggregator(&launcher, dir.path())
        .load_all(
            vec![
                ServerDescriptor::new("broken", "does-not-exist", vec![]),
                ServerDescriptor::new("fetch", "uvx", vec!["mcp-server-fetch".to_string()]),
            ],
            LoadOptions::default(),
            vec![],
        )
        .await;

    assert_eq!(names(&registry), vec!["fetch__fetch"]);
    assert_eq!(registry.failures().len(), 1);
    assert_eq!(registry.failures()[0].server, "broken");

    let result = registry.invoke("fetch__fetch", json!({"url": "x"})).await;
    assert!(!result.is_error);
    assert_eq!(launcher.recorded_calls()[0].0, "fetch/fetch");

    registry.close_all().await;
}

#[tokio::test]
async fn test_exclusions_and_confirmations_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::new().with_server("fs", &["read", "write", "delete"]));

    let mut servers = BTreeMap::new();
    servers.insert(
        "fs".to_string(),
        serde_json::from_value(json!({
            "command": "fs-server",
            "excludeTools": ["delete"],
            "requiresConfirmation": ["write"],
        }))
        .unwrap(),
    );

    let registry = aggregator(&launcher, dir.path())
        .load_all(resolve_descriptors(&servers), LoadOptions::default(), vec![])
        .await;

    assert_eq!(names(&registry), vec!["fs__read", "fs__write"]);
    assert!(registry.requires_confirmation("fs__write"));
    assert!(!registry.requires_confirmation("fs__read"));
    assert!(registry.get("fs__delete").is_none());

    registry.close_all().await;
}

#[tokio::test]
async fn test_disabled_server_is_never_launched() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::new().with_server("off", &["t"]));

    let mut servers = BTreeMap::new();
    servers.insert(
        "off".to_string(),
        serde_json::from_value(json!({"command": "x", "enabled": false})).unwrap(),
    );

    let registry = aggregator(&launcher, dir.path())
        .load_all(resolve_descriptors(&servers), LoadOptions::default(), vec![])
        .await;

    assert!(registry.is_empty());
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_second_run_uses_cache_until_forced() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::new().with_server("fetch", &["fetch"]));
    let descriptors = || vec![ServerDescriptor::new("fetch", "uvx", vec![])];

    let first = aggregator(&launcher, dir.path())
        .load_all(descriptors(), LoadOptions::default(), vec![])
        .await;
    first.close_all().await;
    assert_eq!(launcher.launch_count(), 1);

    // Fresh cache: tools are listed without starting the server.
    let second = aggregator(&launcher, dir.path())
        .load_all(descriptors(), LoadOptions::default(), vec![])
        .await;
    assert_eq!(names(&second), vec!["fetch__fetch"]);
    assert_eq!(launcher.launch_count(), 1);

    // The server starts on first use.
    let result = second.invoke("fetch__fetch", json!({})).await;
    assert!(!result.is_error);
    assert_eq!(launcher.launch_count(), 2);
    second.close_all().await;

    let forced = aggregator(&launcher, dir.path())
        .load_all(
            descriptors(),
            LoadOptions {
                force_refresh: true,
                ..LoadOptions::default()
            },
            vec![],
        )
        .await;
    assert_eq!(launcher.launch_count(), 3);
    forced.close_all().await;
}

#[tokio::test]
async fn test_no_tools_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::new().with_server("fetch", &["fetch"]));

    let registry = aggregator(&launcher, dir.path())
        .load_all(
            vec![ServerDescriptor::new("fetch", "uvx", vec![])],
            LoadOptions {
                no_tools: true,
                ..LoadOptions::default()
            },
            vec![],
        )
        .await;

    assert!(registry.is_empty());
    assert!(registry.openai_tools_json().is_empty());
    assert_eq!(launcher.launch_count(), 0);
}

async fn memory_builtin() -> Arc<dyn NativeTool> {
    let store: Arc<dyn PersistenceLayer> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    Arc::new(SaveMemoryTool::new(store, DEFAULT_MEMORY_NAMESPACE))
}

#[tokio::test]
async fn test_exclusion_across_servers_with_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with_server("a", &["search", "fetch"])
            .with_server("b", &["search"]),
    );

    let mut a = ServerDescriptor::new("a", "server-a", vec![]);
    a.exclude_tools.insert("search".to_string());
    let b = ServerDescriptor::new("b", "server-b", vec![]);

    let registry = aggregator(&launcher, dir.path())
        .load_all(vec![b, a], LoadOptions::default(), vec![memory_builtin().await])
        .await;

    assert_eq!(
        names(&registry),
        vec!["a__fetch", "b__search", "native__save_memory"]
    );
    assert_eq!(registry.openai_tools_json().len(), 3);

    registry.close_all().await;
}

#[tokio::test]
async fn test_same_tool_name_on_two_servers_keeps_both() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with_server("web", &["search"])
            .with_server("docs", &["search"]),
    );

    let registry = aggregator(&launcher, dir.path())
        .load_all(
            vec![
                ServerDescriptor::new("web", "web-server", vec![]),
                ServerDescriptor::new("docs", "docs-server", vec![]),
            ],
            LoadOptions::default(),
            vec![memory_builtin().await],
        )
        .await;

    // Builtins come after every server tool.
    assert_eq!(
        names(&registry),
        vec!["docs__search", "web__search", "native__save_memory"]
    );

    registry.invoke("web__search", json!({"q": "rust"})).await;
    registry.invoke("docs__search", json!({"q": "tokio"})).await;
    assert_eq!(
        launcher.recorded_calls(),
        vec![
            ("web/search".to_string(), json!({"q": "rust"})),
            ("docs/search".to_string(), json!({"q": "tokio"})),
        ]
    );

    registry.close_all().await;
}

#[tokio::test]
async fn test_read_only_load_leaves_cache_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("mcp-tools");
    let launcher = Arc::new(FakeLauncher::new().with_server("fetch", &["fetch"]));

    let registry = aggregator(&launcher, &cache_dir)
        .load_all(
            vec![ServerDescriptor::new("fetch", "uvx", vec![])],
            LoadOptions {
                read_only: true,
                ..LoadOptions::default()
            },
            vec![],
        )
        .await;
    registry.close_all().await;

    assert_eq!(names(&registry), vec!["fetch__fetch"]);
    assert_eq!(launcher.launch_count(), 1);
    assert!(!cache_dir.exists());
}

#[tokio::test]
async fn test_tool_listing_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{"mcpServers": {"fetch": {"command": "uvx", "args": ["mcp-server-fetch"]}}}"#,
    )
    .unwrap();
    let config = AppConfig::load_from_path(&config_path).unwrap();
    let paths = AppPaths::new(dir.path().join(".llm"));
    let launcher = Arc::new(FakeLauncher::new().with_server("fetch", &["fetch"]));

    let registry = app::listing_registry(&Cli::default(), &paths, &config, launcher.clone())
        .await
        .unwrap();
    registry.close_all().await;

    assert_eq!(names(&registry), vec!["fetch__fetch", "native__save_memory"]);
    assert!(!paths.tool_cache_dir().exists());
    assert!(!paths.db_path().exists());

    let memories = app::stored_memories(&paths).await.unwrap();
    assert!(memories.is_empty());
    assert!(!paths.config_dir.exists());
}
