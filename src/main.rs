mod cli;
mod config;
mod git;
mod hook;
mod llm;
mod matcher;
mod models;
mod pr_handler;
mod processor;
mod queue;
mod rate_limit;
mod session_processor;
mod tracker;
mod transcript;

use anyhow::Result;
use config::Config;
use llm::SubprocessLlm;
use processor::QueueProcessor;
use std::sync::Arc;
use std::time::Duration;
use tracker::HttpTracker;

#[tokio::main]
async fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();

    if raw_args.iter().any(|a| a == "--help" || a == "-h")
        || raw_args.first().map(|s| s.as_str()) == Some("help")
    {
        cli::print_help();
        return Ok(());
    }

    if raw_args.iter().any(|a| a == "--version" || a == "-V") {
        println!("convoy {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load();

    match raw_args.first().map(|s| s.as_str()) {
        Some("hook") => dispatch_hook(&raw_args[1..], &config),
        Some("run") | None => run_processor(config).await?,
        Some(other) => {
            eprintln!("convoy: unknown command '{other}'\n");
            eprintln!("Run 'convoy help' for usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn dispatch_hook(args: &[String], config: &Config) {
    match args.first().map(|s| s.as_str()) {
        Some("session-stop") => hook::run_session_stop(&config.queue_path),
        Some("post-tool-use") => hook::run_post_tool_use(&config.queue_path),
        Some(other) => {
            eprintln!("convoy hook: unknown event '{other}'");
            std::process::exit(1);
        }
        None => {
            eprintln!("convoy hook: expected 'session-stop' or 'post-tool-use'");
            std::process::exit(1);
        }
    }
}

async fn run_processor(config: Config) -> Result<()> {
    let endpoint = std::env::var("CONVOY_TRACKER_ENDPOINT")
        .unwrap_or_else(|_| "https://api.linear.app/graphql".to_string());
    let tracker = Arc::new(HttpTracker::from_env(endpoint)?);
    let llm = Arc::new(SubprocessLlm::new(
        config.llm_command.clone(),
        Duration::from_secs(config.llm_timeout_secs),
    ));

    eprintln!("[convoy] queue={}", config.queue_path.display());

    let processor = QueueProcessor::start(config, tracker, llm).await?;
    processor.run().await
}
