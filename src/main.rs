#![allow(missing_docs)]

//! Straylight — Slack secret-disclosure sentinel.
//!
//! Two modes: `serve` runs the webhook receiver against Slack; `scan`
//! compiles the same rule corpus and checks a local text, for trying out
//! rules without a Slack workspace.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use straylight::config::Config;
use straylight::credentials::SlackCredentials;
use straylight::report;
use straylight::rules;
use straylight::scanner::Scanner;
use straylight::slack::auth::SignatureVerifier;
use straylight::slack::client::SlackClient;
use straylight::webhook::Pipeline;
use straylight::{logging, server};

#[derive(Parser, Debug)]
#[command(name = "straylight", version, about)]
struct Cli {
    /// Path to the config file (default: ./straylight.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the webhook receiver (the default).
    Serve {
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Scan a local text with the compiled rule corpus and print the
    /// warning that Slack users would receive. Exits 1 when secrets are
    /// detected, so it can gate scripts.
    Scan {
        /// Text to scan. Reads stdin when neither this nor --file is given.
        #[arg(long)]
        text: Option<String>,

        /// File to scan instead of --text.
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(config, port).await,
        Command::Scan { text, file } => scan(&config, text, file),
    }
}

async fn serve(config: Config, port_override: Option<u16>) -> Result<()> {
    let _logging_guard = logging::init_serve(&config.logs_dir, &config.log_level)
        .context("failed to initialise logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "straylight starting");

    // Both secrets are required; refuse to start without them.
    let credentials = SlackCredentials::from_env().context("missing Slack credentials")?;

    // Compile the rule corpus exactly once. A broken corpus is fatal — a
    // scanner with silently-missing rules is worse than no scanner.
    let rule_set = rules::load_rule_set(config.rules_dir.as_deref())
        .context("failed to compile rule corpus")?;
    info!(rules = rule_set.len(), "rule corpus compiled");

    let scanner = Scanner::new(Arc::new(rule_set)).with_max_scan_bytes(config.max_scan_bytes);
    let verifier = SignatureVerifier::new(credentials.signing_secret)
        .with_replay_window_secs(config.replay_window_secs);
    let notifier =
        SlackClient::new(credentials.api_token).with_api_base(config.slack_api_base.clone());
    let pipeline = Arc::new(Pipeline::new(verifier, scanner, Arc::new(notifier)));

    let port = port_override.unwrap_or(config.port);
    server::serve(pipeline, port).await
}

fn scan(config: &Config, text: Option<String>, file: Option<PathBuf>) -> Result<()> {
    logging::init_cli();

    let rule_set = rules::load_rule_set(config.rules_dir.as_deref())
        .context("failed to compile rule corpus")?;
    let scanner = Scanner::new(Arc::new(rule_set)).with_max_scan_bytes(config.max_scan_bytes);

    let buffer: Vec<u8> = match (text, file) {
        (Some(text), _) => text.into_bytes(),
        (None, Some(path)) => std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => std::io::read_to_string(std::io::stdin())
            .context("failed to read stdin")?
            .into_bytes(),
    };

    let scan = scanner
        .scan_bytes(&buffer)
        .context("failed to scan input")?;

    match report::format_report(&scan) {
        Some(message) => {
            println!("{message}");
            std::process::exit(1);
        }
        None => {
            println!("no secrets detected");
            Ok(())
        }
    }
}
