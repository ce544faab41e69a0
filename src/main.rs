//! CLI entry point for the itch-mirror tool.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use itch_mirror::{
    ApiClient, Bundle, ErrorLog, FolderNaming, Library, SyncConfig, SyncStats, login_api,
    login_web,
};
use tracing::{debug, info};
use url::Url;

mod cli;
mod progress;

use cli::Args;

/// Production API base for the login exchange.
const API_BASE: &str = "https://api.itch.io/";

/// Production web base for session login and bundle pages.
const WEB_BASE: &str = "https://itch.io/";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("itch-mirror starting");

    if let Some(bundle_url) = args.claim_bundle.as_deref() {
        return claim_bundle(bundle_url).await;
    }

    run_sync(args).await
}

/// Claims every unowned item in a bundle using a web login session.
async fn claim_bundle(bundle_url: &str) -> Result<()> {
    let url = Url::parse(bundle_url).context("invalid bundle URL")?;
    let web_base = Url::parse(WEB_BASE)?;

    let (username, password) = prompt_credentials()?;
    let session = login_web(&web_base, &username, &password)
        .await
        .context("web login failed")?;

    let summary = Bundle::new(url).claim_all(&session).await?;
    println!(
        "Claimed {} items across {} pages",
        summary.claimed, summary.pages
    );
    Ok(())
}

/// Loads the requested inventory and syncs it.
async fn run_sync(args: Args) -> Result<()> {
    let token = match args.api_key.clone() {
        Some(key) => key,
        None => {
            let api_base = Url::parse(API_BASE)?;
            let (username, password) = prompt_credentials()?;
            login_api(&api_base, &username, &password)
                .await
                .context("login failed")?
        }
    };

    let api = ApiClient::new(token);
    let config = SyncConfig {
        output_dir: args.output.clone(),
        platform: args.platform.map(Into::into),
        verify: !args.no_verify,
        naming: if args.human_folders {
            FolderNaming::Human
        } else {
            FolderNaming::Slug
        },
    };

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("cannot create {}", config.output_dir.display()))?;
    let log = ErrorLog::new(config.output_dir.join("errors.txt"));
    let cache_path = config.output_dir.join("key_pairs.json");

    let mut library = Library::new();
    match (args.publisher.as_deref(), args.game.as_deref()) {
        (Some(publisher), Some(game)) => {
            library.load_game(&api, publisher, game, &cache_path).await?;
        }
        (Some(publisher), None) => {
            library.load_publisher_catalog(&api, publisher).await?;
        }
        _ => {
            library.load_owned_games(&api).await?;
        }
    }

    let total = library.games.len();
    let stats = Arc::new(SyncStats::new());
    let use_spinner = !args.quiet && io::stderr().is_terminal();
    let (ui_handle, stop) = progress::spawn_progress_ui(use_spinner, Arc::clone(&stats), total);

    let summary = library
        .sync_all(
            &api,
            &config,
            &log,
            usize::from(args.concurrency),
            Arc::clone(&stats),
        )
        .await?;

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = ui_handle {
        let _ = handle.await;
    }

    println!(
        "Downloaded {} games, {} errors",
        summary.succeeded, summary.failed
    );
    Ok(())
}

/// Prompts for credentials on the terminal.
fn prompt_credentials() -> Result<(String, String)> {
    let username = prompt("Username")?;
    let password = prompt("Password")?;
    Ok((username, password))
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
