//! CLI entrypoint and subcommand orchestration.

mod config;
mod review;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent::{AgentRuntime, LlmProvider, OpenAiProvider, SqliteMemory, ToolRegistry};
use clap::{Parser, Subcommand};
use config::Config;
use proto::{ChannelId, RejectAllHandler, ReviewHandler, SessionId};
use review::ConsoleReviewHandler;
use tools::{GetOrdersTool, OrdersClient, PayLinkClient};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Top-level command-line arguments for the duka application.
#[derive(Parser)]
#[command(name = "duka")]
#[command(
    about = "Order-support agent with human-approved M-Pesa payments",
    version = "0.1.0"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging to ~/.duka/logs/
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Resume an existing session by its ID (shortcut for `chat -s <id>`)
    #[arg(short = 's', long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands available in the application.
#[derive(Subcommand)]
enum Commands {
    /// Start the interactive chat REPL (default when no subcommand is given)
    Chat {
        /// Resume an existing session by its ID
        #[arg(short = 's', long)]
        session: Option<String>,
    },

    /// Run a single message and exit
    Run {
        /// Message to send to the agent
        #[arg(short = 'e', long)]
        exec: String,

        /// Reject gated tool calls instead of prompting (for scripting)
        #[arg(long, default_value_t = false)]
        no_input: bool,
    },

    /// List stored sessions
    Sessions,
}

#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Determine effective command (default to Chat if none given)
    let command = cli.command.unwrap_or(Commands::Chat {
        session: cli.session.clone(),
    });

    // Initialize tracing. Console logging defaults to warn so the REPL and
    // review prompts stay readable; --debug writes debug-level logs to
    // ~/.duka/logs/debug.YYYY-MM-DD.log with daily rotation.
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    if cli.debug {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let log_dir = std::path::PathBuf::from(home).join(".duka").join("logs");
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _file_guard = Some(guard);

        let console = fmt::layer().with_target(false).with_filter(console_filter);
        let file = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(EnvFilter::new(
                "debug,hyper_util=info,rustls=info,reqwest=info,sqlx=info",
            ));
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .init();
    } else {
        _file_guard = None;
        fmt()
            .with_env_filter(console_filter)
            .with_target(false)
            .init();
    }

    // Load config
    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Failed to load config ({e}), using defaults");
        Config::default()
    });

    match command {
        Commands::Chat { session } => cmd_chat(config, session.or(cli.session)).await,
        Commands::Run { exec, no_input } => cmd_run(config, exec, no_input).await,
        Commands::Sessions => cmd_sessions(config).await,
    }
}

/// Creates a runtime with configured tools, memory, LLM provider, and the
/// approval gate wired to the given review handler.
async fn build_runtime(
    config: &Config,
    review: Arc<dyn ReviewHandler>,
) -> anyhow::Result<Arc<AgentRuntime>> {
    // Tool registry: order lookup plus the payment provider's tool set.
    let mut registry = ToolRegistry::new();
    let orders_client = Arc::new(OrdersClient::new(
        &config.orders.base_url,
        &config.orders.api_key,
    ));
    registry.register(GetOrdersTool::new(orders_client));

    let paylink = Arc::new(PayLinkClient::new(
        &config.paylink.base_url,
        &config.paylink.api_key,
    ));
    for tool in paylink.tools() {
        registry.register_arc(tool);
    }
    let registry = Arc::new(registry);

    // Memory
    let memory = SqliteMemory::open(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("DB error: {e}"))?;
    let memory = Arc::new(memory);

    // LLM provider
    let api_key = config.resolve_api_key();
    if api_key.is_empty() {
        warn!("No API key configured. Set DUKA_API_KEY or OPENAI_API_KEY.");
    }
    if config.paylink.api_key.is_empty() {
        warn!("No PayLink API key configured; payment tools will fail. Set PAYLINK_API_KEY.");
    }
    let llm: Arc<dyn LlmProvider> = match config.agent.effective_base_url() {
        Some(base_url) => Arc::new(OpenAiProvider::with_base_url(&api_key, base_url)),
        None => Arc::new(OpenAiProvider::new(&api_key)),
    };

    let policy = config.approval.to_policy();
    info!(gated_tools = ?policy.gated_tools(), "Approval gate configured");

    let mut runtime = AgentRuntime::new(
        llm,
        registry,
        memory,
        config.agent.effective_model(),
        config.agent.max_tool_rounds,
        policy,
        review,
    )
    .with_temperature(config.agent.temperature);
    if let Some(secs) = config.approval.timeout_secs {
        runtime = runtime.with_review_timeout(Duration::from_secs(secs));
    }

    Ok(Arc::new(runtime))
}

/// Starts the interactive chat REPL.
async fn cmd_chat(config: Config, session: Option<String>) -> anyhow::Result<()> {
    let runtime = build_runtime(&config, Arc::new(ConsoleReviewHandler)).await?;
    let channel_id = ChannelId::new("cli", "chat");
    let session_id = match session {
        Some(id) => SessionId::from(id),
        None => SessionId::new(),
    };

    let policy = config.approval.to_policy();
    println!(
        "duka — order support agent (model: {})",
        config.agent.effective_model()
    );
    println!(
        "Gated tools: {}. Type /quit to exit.",
        policy.gated_tools().join(", ")
    );

    loop {
        let Some(raw) = read_user_line("duka> ").await? else {
            break; // EOF
        };
        let Some(line) = normalize_input_line(&raw) else {
            continue;
        };
        if is_quit_command(&line) {
            break;
        }

        match runtime.process(&channel_id, &session_id, &line).await {
            Ok((text, _usage)) => println!("\n{text}\n"),
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    println!("Session saved as {session_id}.");
    Ok(())
}

/// Runs a single message through the agent and prints the final response.
async fn cmd_run(config: Config, exec: String, no_input: bool) -> anyhow::Result<()> {
    let review: Arc<dyn ReviewHandler> = if no_input {
        Arc::new(RejectAllHandler)
    } else {
        Arc::new(ConsoleReviewHandler)
    };
    let runtime = build_runtime(&config, review).await?;

    let channel_id = ChannelId::new("cli", "run");
    let session_id = SessionId::new();

    match runtime.process(&channel_id, &session_id, &exec).await {
        Ok((text, _usage)) => {
            println!("{text}");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Lists stored sessions with their first user message as a preview.
async fn cmd_sessions(config: Config) -> anyhow::Result<()> {
    let memory = SqliteMemory::open(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("DB error: {e}"))?;

    let sessions = memory
        .list_sessions_with_preview()
        .await
        .map_err(|e| anyhow::anyhow!("DB error: {e}"))?;

    if sessions.is_empty() {
        println!("No stored sessions.");
        return Ok(());
    }

    for (id, channel, updated, preview) in sessions {
        println!(
            "{id}  [{channel}]  {}  {}",
            updated.format("%Y-%m-%d %H:%M"),
            preview_snippet(&preview)
        );
    }
    Ok(())
}

/// Prompts and reads one line from stdin; `None` on EOF.
async fn read_user_line(prompt: &str) -> anyhow::Result<Option<String>> {
    use std::io::Write;

    let prompt = prompt.to_string();
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        let mut line = String::new();
        let n = std::io::stdin().read_line(&mut line)?;
        Ok(if n == 0 { None } else { Some(line) })
    })
    .await?;
    Ok(line?)
}

/// Trims an input line and drops empty lines.
fn normalize_input_line(raw: &str) -> Option<String> {
    let line = raw.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Returns true when input requests REPL termination.
fn is_quit_command(line: &str) -> bool {
    line == "/quit" || line == "/exit"
}

/// Shortens a session preview to one display line.
fn preview_snippet(preview: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 60;
    let flat = preview.replace('\n', " ");
    if flat.chars().count() <= MAX_PREVIEW_CHARS {
        flat
    } else {
        let kept: String = flat.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{kept}…")
    }
}
