use llm_mcp_cli::config::{AppConfig, AppPaths, Cli, ConfigError, DEFAULT_SYSTEM_PROMPT};
use llm_mcp_cli::llm::Provider;
use llm_mcp_cli::mcp::config::ServerTransport;
use serial_test::serial;
use std::env;
use std::fs;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("LLM_LLM__MODEL");
        env::remove_var("LLM_LLM__TEMPERATURE");
        env::remove_var("LLM_LLM__API_KEY");
        env::remove_var("LLM_API_KEY");
        env::remove_var("LLM_CONFIG");
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    fs::write(&path, body).expect("Failed to write temp config");
    path
}

#[test]
#[serial]
fn test_defaults_for_minimal_file() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "{}");

    let config = AppConfig::load_from_path(&path).expect("Failed to load config");
    assert_eq!(config.llm.provider, "openai");
    assert_eq!(config.llm.model, "gpt-4o");
    assert!(config.llm.temperature.abs() < f32::EPSILON);
    assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    assert!(config.server_descriptors().is_empty());
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"{
            "systemPrompt": "Be brief. {memories}",
            "llm": {
                "provider": "openrouter",
                "model": "anthropic/claude-3.5-sonnet",
                "api_key": "sk-file",
                "temperature": 0.2,
                "base_url": null
            },
            "mcpServers": {
                "fetch": {
                    "command": "uvx",
                    "args": ["mcp-server-fetch"],
                    "requires_confirmation": ["fetch"]
                },
                "off": { "command": "x", "enabled": false }
            },
            "prompts": { "tr": "Translate {text}" }
        }"#,
    );

    let config = AppConfig::load_from_path(&path).expect("Failed to load config from file");
    assert_eq!(config.system_prompt, "Be brief. {memories}");
    assert_eq!(config.llm.model, "anthropic/claude-3.5-sonnet");
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-file"));
    assert_eq!(config.prompts["tr"], "Translate {text}");

    let descriptors = config.server_descriptors();
    assert_eq!(descriptors.len(), 1);
    assert!(descriptors[0].needs_confirmation("fetch"));

    let settings = config.llm_settings();
    assert_eq!(settings.provider, Provider::OpenRouter);
    assert_eq!(settings.base_url, Provider::OpenRouter.default_base_url());
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"llm": {"model": "gpt-4o-mini", "temperature": 0.5}}"#);

    unsafe {
        env::set_var("LLM_LLM__MODEL", "gpt-4.1");
    }

    let config = AppConfig::load_from_path(&path).expect("Failed to load config");
    assert_eq!(config.llm.model, "gpt-4.1");
    assert!((config.llm.temperature - 0.5).abs() < f32::EPSILON);

    clear_env_vars();
}

#[test]
#[serial]
fn test_api_key_falls_back_to_env() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"llm": {"provider": "openai"}}"#);

    unsafe {
        env::set_var("LLM_API_KEY", "sk-env");
    }
    let config = AppConfig::load_from_path(&path).expect("Failed to load config");
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-env"));

    // A key in the file wins.
    let path = write_config(&dir, r#"{"llm": {"api_key": "sk-file"}}"#);
    let config = AppConfig::load_from_path(&path).expect("Failed to load config");
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-file"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_explicit_config_via_cli() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"llm": {"model": "local-model"}}"#);
    let paths = AppPaths::new(dir.path().join("state"));

    let cli = Cli {
        config: Some(path.clone()),
        ..Cli::default()
    };
    let config = AppConfig::load(&cli, &paths).expect("Failed to load config");
    assert_eq!(config.path, path);
    assert_eq!(config.llm.model, "local-model");
}

#[test]
#[serial]
fn test_invalid_file_is_reported() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "{ not json");

    let err = AppConfig::load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
#[serial]
fn test_empty_model_is_rejected() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"llm": {"model": "  "}}"#);

    let err = AppConfig::load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
#[serial]
fn test_remote_and_local_servers() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"{
            "mcpServers": {
                "fetch": { "command": "uvx", "args": ["mcp-server-fetch"] },
                "search": {
                    "url": "https://search.example.com/mcp",
                    "headers": { "X-Api-Key": "k" }
                }
            }
        }"#,
    );

    let config = AppConfig::load_from_path(&path).expect("Failed to load config");
    let descriptors = config.server_descriptors();
    assert_eq!(descriptors.len(), 2);
    assert!(matches!(descriptors[0].transport, ServerTransport::Stdio { .. }));
    match &descriptors[1].transport {
        ServerTransport::StreamableHttp { url, headers } => {
            assert_eq!(url, "https://search.example.com/mcp");
            assert_eq!(headers["X-Api-Key"], "k");
        }
        other => panic!("unexpected transport: {other:?}"),
    }
}

#[test]
#[serial]
fn test_server_without_transport_is_rejected() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"mcpServers": {"broken": {"args": ["x"]}}}"#);

    let err = AppConfig::load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("broken")));
}
