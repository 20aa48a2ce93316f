//! Liaison CLI - terminal frontend for the assistant bridge
//!
//! A thin chat loop over the liaison-core dispatcher: stdin lines become
//! inbound messages, choice menus are answered by typing the option number,
//! and all session orchestration lives in the core.

mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use liaison_core::config::Config;
use liaison_core::dispatch::Dispatcher;

use terminal::TerminalNotifier;

#[derive(Parser)]
#[command(name = "liaison")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive working-directory assistant sessions from a terminal chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to the standard config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Working directory for the first session
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat mode (the default)
    Chat,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "info,liaison_core=debug"
        } else {
            "warn"
        })
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(workspace) = &cli.workspace {
        // dunce avoids the UNC prefix on Windows
        let resolved = dunce::canonicalize(workspace).unwrap_or_else(|_| workspace.clone());
        config.default_working_dir = Some(resolved.to_string_lossy().into_owned());
    }

    match cli.command {
        Some(Commands::Config) => show_config(&config),
        _ => run_chat(config).await,
    }
}

fn show_config(config: &Config) -> anyhow::Result<()> {
    if let Some(path) = Config::default_path() {
        println!("# {}", path.display());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn run_chat(config: Config) -> anyhow::Result<()> {
    let notifier = Arc::new(TerminalNotifier::new());
    let dispatcher = Dispatcher::new(&config, notifier.clone());
    let chat = "terminal".to_string();

    println!(
        "{} — type a message, {} for commands, {} to leave",
        style("liaison").bold(),
        style("/help").cyan(),
        style("/quit").cyan()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        // A bare number answers the last choice menu
        if let Ok(n) = line.parse::<usize>() {
            if let Some(action) = notifier.action_for_choice(n) {
                if let Err(e) = dispatcher.handle_action(&chat, &action).await {
                    error!("Action failed: {}", e);
                }
                continue;
            }
        }

        if let Err(e) = dispatcher.handle_message(&chat, line).await {
            error!("Message handling failed: {}", e);
        }
    }

    Ok(())
}
