//! `hookclaw agent` — Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use hookclaw_agent::{AgentLoop, ContextBuilder};
use hookclaw_config::AppConfig;
use hookclaw_core::bus::{InboundMessage, MessageBus};
use hookclaw_session::FileSessionStore;
use hookclaw_tools::ToolUsageLogger;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Wire provider, tools, sessions and usage logging into an agent loop.
pub fn build_agent(config: &AppConfig, bus: Arc<MessageBus>) -> Result<AgentLoop, Box<dyn std::error::Error>> {
    let provider = hookclaw_providers::build_from_config(config)?;
    let workspace = config.workspace_path();
    std::fs::create_dir_all(&workspace)?;

    let sessions_dir = AppConfig::sessions_dir();
    let sessions = Arc::new(FileSessionStore::new(&sessions_dir));
    let tools = Arc::new(hookclaw_tools::default_registry(config));
    let logger = ToolUsageLogger::new(config.tools.logging.clone(), &sessions_dir)
        .with_bus(Arc::clone(&bus));

    Ok(AgentLoop::new(bus, provider, sessions, tools, ContextBuilder::new(workspace))
        .with_config(config)
        .with_usage_logger(logger))
}

pub async fn run(message: Option<String>, session: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    export OPENROUTER_API_KEY='sk-or-v1-...'   (recommended)");
        eprintln!("    export OPENAI_API_KEY='sk-...'             (with api_base set)");
        eprintln!("    export HOOKCLAW_API_KEY='sk-...'           (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let bus = Arc::new(MessageBus::default());
    let agent = build_agent(&config, Arc::clone(&bus))?;

    // Ctrl+C stops the running turn; the loop compresses what it has.
    let abort = agent.abort_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            abort.store(true, Ordering::SeqCst);
            eprintln!("\n  [Aborting current turn...]");
        }
    });

    // Plan blocks, allow-list warnings and tool notices arrive on the bus.
    let notices = Arc::clone(&bus);
    tokio::spawn(async move {
        while let Some(notice) = notices.consume_outbound().await {
            if notice.content.is_empty() {
                continue;
            }
            eprintln!();
            for line in notice.content.lines() {
                eprintln!("  [notice] {line}");
            }
        }
    });

    if let Some(msg) = message {
        eprint!("  Thinking...");
        let response = agent.process_direct(&msg, &session).await?;
        eprint!("\r              \r");
        println!("{response}");
        return Ok(());
    }

    let (channel, chat_id) = session.split_once(':').unwrap_or(("cli", session.as_str()));

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        HookClaw Agent — Interactive Mode      ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", agent.model());
    println!("  Planner:   {}", config.planner_model);
    println!("  Session:   {channel}:{chat_id}");
    println!("  Workspace: {}", config.workspace_path().display());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Commands: /restart, /config. Ctrl+C aborts a running turn.");
    println!("  Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        let mut inbound = InboundMessage::new(channel, "user", chat_id, input);
        if input.starts_with('/') {
            inbound = inbound.as_command();
        }

        eprint!("  ...");
        let result = agent.handle(&inbound).await;
        eprint!("\r     \r");
        match result {
            Ok(Some(reply)) => {
                println!();
                if let Some(digest) = reply.collapsible() {
                    debug!("Tool digest:\n{digest}");
                    for line in digest.lines() {
                        println!("  │ {line}");
                    }
                }
                for line in reply.content.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Ok(None) => println!(),
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}
