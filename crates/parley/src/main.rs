//! `parley`: chat with a tool-calling model from the terminal.
//!
//! ```text
//! parley --message "Search for Python tutorials"
//! parley --status
//! parley                      # interactive, one thread per session
//! ```

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use parley::ChatResponse;
use parley::agent::Orchestrator;
use parley::settings::Settings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Tool-calling conversation orchestrator.
#[derive(Parser)]
#[command(name = "parley", version)]
struct Cli {
    /// Send one message and exit. Without this, reads messages from stdin.
    #[arg(long, short)]
    message: Option<String>,

    /// Continue an existing thread.
    #[arg(long)]
    thread: Option<String>,

    /// Print the status snapshot as JSON and exit.
    #[arg(long)]
    status: bool,

    /// Maximum model calls per message.
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Overall deadline per message, in seconds (0 disables it).
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Model identifier.
    #[arg(long)]
    model: Option<String>,

    /// Use a canned-reply model instead of the network.
    #[arg(long)]
    offline: bool,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short)]
    verbose: bool,

    /// Print the full response object as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "parley=debug" } else { "parley=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = Settings::from_env();
    settings.offline = cli.offline;
    if let Some(model) = cli.model.clone() {
        settings.model = model;
    }
    if let Some(rounds) = cli.max_rounds {
        settings.max_rounds = rounds.max(1);
    }
    if let Some(secs) = cli.deadline_secs {
        settings.deadline = (secs > 0).then_some(Duration::from_secs(secs));
    }

    let orchestrator = match settings.build_orchestrator() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    if cli.status {
        return match serde_json::to_string_pretty(&orchestrator.status()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::from(1)
            }
        };
    }

    if !settings.model_configured() {
        eprintln!("Error: OPENAI_API_KEY environment variable is not set (use --offline for a demo)");
        return ExitCode::from(1);
    }

    let _eviction = orchestrator
        .store()
        .spawn_eviction(settings.eviction_interval());

    match cli.message {
        Some(message) => one_shot(&orchestrator, cli.thread.as_deref(), &message, cli.json).await,
        None => interactive(&orchestrator, cli.thread, cli.json).await,
    }
}

async fn one_shot(
    orchestrator: &Orchestrator,
    thread: Option<&str>,
    message: &str,
    json: bool,
) -> ExitCode {
    match orchestrator.handle(thread, message).await {
        Ok(reply) => {
            print_reply(&reply, json);
            if reply.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("Invalid message: {e}");
            ExitCode::from(2)
        }
    }
}

async fn interactive(orchestrator: &Orchestrator, mut thread: Option<String>, json: bool) -> ExitCode {
    eprintln!("parley: type a message and press Enter (Ctrl-D to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error reading stdin: {e}");
                return ExitCode::from(1);
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match orchestrator.handle(thread.as_deref(), &line).await {
            Ok(reply) => {
                print_reply(&reply, json);
                thread = Some(reply.thread_id);
            }
            Err(e) => eprintln!("Invalid message: {e}"),
        }
    }
}

fn print_reply(reply: &ChatResponse, json: bool) {
    if json {
        match serde_json::to_string(reply) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Error: {e}"),
        }
        return;
    }
    println!("{}", reply.response);
    if let Some(error) = &reply.error {
        eprintln!("[thread {}] error: {error}", reply.thread_id);
    } else {
        eprintln!("[thread {}]", reply.thread_id);
    }
}
