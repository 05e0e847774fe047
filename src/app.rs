//! One CLI invocation, from parsed flags to exit.

use std::io::{IsTerminal, Read};
use std::sync::Arc;

use anyhow::Context;
use console::style;

use crate::agent::{
    Agent, AgentTurnState, AutoApprove, ConfirmationGate, OutputSink, TurnController, TurnOutcome,
};
use crate::config::{AppConfig, AppPaths, Cli};
use crate::llm::{ChatCompletionsDriver, LlmDriver, Message};
use crate::mcp::registry::{LoadOptions, NativeTool, ToolAggregator, ToolRegistry};
use crate::mcp::{RmcpLauncher, ServerLauncher, ToolCache};
use crate::output::{ConsoleConfirmation, TerminalSink};
use crate::prompt::{ParsedQuery, PromptTemplates, parse_query};
use crate::session::{ConversationManager, ThreadId};
use crate::storage::{DEFAULT_MEMORY_NAMESPACE, MemoryRecord, PersistenceLayer, SqliteStore};
use crate::tools::{SaveMemoryTool, memory_snippet};

/// Everything a conversation turn needs besides the query.
#[derive(Clone)]
pub struct TurnContext {
    pub sessions: ConversationManager,
    pub store: Arc<dyn PersistenceLayer>,
    pub registry: ToolRegistry,
    pub driver: Arc<dyn LlmDriver>,
    pub system_prompt: String,
    pub gate: Arc<dyn ConfirmationGate>,
    pub confirmations: bool,
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("registry", &self.registry)
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

/// Result of [`run_turn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub thread_id: ThreadId,
    pub outcome: TurnOutcome,
}

fn now_string() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Run one conversation turn and checkpoint it.
///
/// Nothing is persisted when the turn fails; the previously saved thread and
/// its history stay as they were.
pub async fn run_turn(
    ctx: &TurnContext,
    query: &ParsedQuery,
    sink: &mut dyn OutputSink,
) -> anyhow::Result<TurnSummary> {
    let thread_id = ctx
        .sessions
        .resolve_or_start(query.continue_previous)
        .await?;
    let mut messages = ctx.sessions.load_history(&thread_id).await?;
    messages.push(Message::user(query.text.clone()));

    let memories = memory_snippet(ctx.store.as_ref(), DEFAULT_MEMORY_NAMESPACE).await?;
    let state = AgentTurnState::new(messages, now_string(), memories);

    let agent = Agent::new(
        Arc::clone(&ctx.driver),
        ctx.registry.clone(),
        ctx.system_prompt.clone(),
    );
    let mut controller = TurnController::new(ctx.registry.clone(), Arc::clone(&ctx.gate));
    if !ctx.confirmations {
        controller = controller.without_confirmations();
    }

    let report = controller.run(agent.stream(state), sink).await?;

    match &report.state {
        Some(state) => ctx.sessions.checkpoint_turn(&thread_id, &state.messages).await?,
        None => ctx.sessions.save_thread(&thread_id).await?,
    }

    tracing::info!(
        thread_id = %thread_id,
        outcome = ?report.outcome,
        "Turn finished"
    );
    Ok(TurnSummary {
        thread_id,
        outcome: report.outcome,
    })
}

fn read_piped_stdin() -> Option<String> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return None;
    }
    let mut buf = String::new();
    match stdin.read_to_string(&mut buf) {
        Ok(_) => Some(buf),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read stdin");
            None
        }
    }
}

fn print_prompts(templates: &PromptTemplates) {
    println!("{}", style("Prompt templates").bold());
    for (name, template) in templates.iter() {
        let args = PromptTemplates::variables(template).join(", ");
        println!("  {}  {}", style(name).cyan().bold(), template.replace('\n', " "));
        if !args.is_empty() {
            println!("      args: {args}");
        }
    }
}

fn print_tools(registry: &ToolRegistry) {
    println!("{}", style("Tools").bold());
    for (name, tool) in registry.tools() {
        let marker = if tool.requires_confirmation() {
            style(" [confirm]").yellow().to_string()
        } else {
            String::new()
        };
        println!("  {}{marker}", style(name).cyan().bold());
        let description = tool.description().lines().next().unwrap_or_default();
        if !description.is_empty() {
            println!("      {description}");
        }
    }
    for failure in registry.failures() {
        println!(
            "  {} {}: {}",
            style("unavailable").red(),
            failure.server,
            failure.error
        );
    }
}

fn print_memories(memories: &[MemoryRecord]) {
    println!("{}", style("Memories").bold());
    if memories.is_empty() {
        println!("  (none)");
    }
    for m in memories {
        println!("  - {} {}", m.content, style(m.created_at.format("%Y-%m-%d")).dim());
    }
}

/// Stored memories, without creating the database when it does not exist.
pub async fn stored_memories(paths: &AppPaths) -> anyhow::Result<Vec<MemoryRecord>> {
    let db_path = paths.db_path();
    let Some(store) = SqliteStore::open_existing(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?
    else {
        return Ok(Vec::new());
    };
    let memories = store.list_memories(DEFAULT_MEMORY_NAMESPACE).await;
    store.close().await;
    Ok(memories?)
}

/// Tool registry for `--list-tools`.
///
/// Nothing is persisted: discovery results stay out of the capability cache
/// and the conversation database is never opened.
pub async fn listing_registry(
    cli: &Cli,
    paths: &AppPaths,
    config: &AppConfig,
    launcher: Arc<dyn ServerLauncher>,
) -> anyhow::Result<ToolRegistry> {
    // Listing never calls tools; the builtin only needs something to hold.
    let scratch: Arc<dyn PersistenceLayer> = Arc::new(SqliteStore::open_in_memory().await?);
    Ok(load_tools(cli, paths, config, launcher, scratch, true).await)
}

async fn load_tools(
    cli: &Cli,
    paths: &AppPaths,
    config: &AppConfig,
    launcher: Arc<dyn ServerLauncher>,
    persistence: Arc<dyn PersistenceLayer>,
    read_only: bool,
) -> ToolRegistry {
    let builtins: Vec<Arc<dyn NativeTool>> = vec![Arc::new(SaveMemoryTool::new(
        persistence,
        DEFAULT_MEMORY_NAMESPACE,
    ))];

    ToolAggregator::new(launcher, ToolCache::new(paths.tool_cache_dir()))
        .load_all(
            config.server_descriptors(),
            LoadOptions {
                force_refresh: cli.force_refresh,
                no_tools: cli.no_tools,
                read_only,
            },
            builtins,
        )
        .await
}

/// Entry point used by the binary.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = AppPaths::from_home()?;
    let config = AppConfig::load(&cli, &paths)?;
    let templates = PromptTemplates::builtin().with_overrides(config.prompts.clone());

    if cli.list_prompts {
        print_prompts(&templates);
        return Ok(());
    }

    if cli.show_memories {
        print_memories(&stored_memories(&paths).await?);
        return Ok(());
    }

    if cli.list_tools {
        let registry = listing_registry(&cli, &paths, &config, Arc::new(RmcpLauncher)).await?;
        print_tools(&registry);
        registry.close_all().await;
        return Ok(());
    }

    // Parse before launching anything so template errors cost nothing.
    let query = parse_query(&cli.query, &templates, read_piped_stdin)?;
    if query.text.trim().is_empty() {
        anyhow::bail!("no query given; pass one as arguments or pipe it on stdin");
    }

    let store = Arc::new(
        SqliteStore::open(&paths.db_path())
            .await
            .with_context(|| format!("failed to open {}", paths.db_path().display()))?,
    );

    let result = converse(&cli, &paths, &config, &query, Arc::clone(&store)).await;
    store.close().await;
    result
}

async fn converse(
    cli: &Cli,
    paths: &AppPaths,
    config: &AppConfig,
    query: &ParsedQuery,
    store: Arc<SqliteStore>,
) -> anyhow::Result<()> {
    let persistence: Arc<dyn PersistenceLayer> = store;
    let registry = load_tools(
        cli,
        paths,
        config,
        Arc::new(RmcpLauncher),
        Arc::clone(&persistence),
        false,
    )
    .await;

    let gate: Arc<dyn ConfirmationGate> = if cli.no_confirmations {
        Arc::new(AutoApprove)
    } else {
        Arc::new(ConsoleConfirmation)
    };
    let ctx = TurnContext {
        sessions: ConversationManager::new(Arc::clone(&persistence)),
        store: persistence,
        registry: registry.clone(),
        driver: Arc::new(ChatCompletionsDriver::new(config.llm_settings())),
        system_prompt: config.system_prompt.clone(),
        gate,
        confirmations: !cli.no_confirmations,
    };
    let mut sink = TerminalSink::stdout(cli.text_only);
    let result = run_turn(&ctx, query, &mut sink).await.map(|_| ());

    registry.close_all().await;
    result
}
