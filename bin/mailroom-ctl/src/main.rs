//! Mailroom operator CLI
//!
//! Works directly against the dispatch store named in the configuration;
//! it never talks to the campaign service.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `example-config` | Print a documented configuration file |
//! | `check-config` | Load, apply `MAILROOM_*` overrides and validate |
//! | `enqueue <type> <id>` | Queue a subject for dispatch |
//! | `cancel <type> <id>` | Remove a pending subject |
//! | `status <type> <id>` | Print the subject's dispatch status as JSON |
//! | `history [--page N]` | Browse sent campaigns, newest first |
//! | `recover-claims` | Clear expired claims |
//!
//! `RUST_LOG` and `LOG_FORMAT` control log output as for every Mailroom
//! process.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use mr_common::{logging::init_logging, ContentRef, Paginator};
use mr_config::{AppConfig, ConfigLoader};
use mr_queue::{DispatchQueue, QueueError};

#[derive(Parser, Debug)]
#[command(name = "mailroom-ctl")]
#[command(about = "Inspect and manage the Mailroom dispatch queue")]
struct Args {
    /// Configuration file; the standard search paths are used when absent
    #[arg(long, short, env = "MAILROOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a documented configuration file
    ExampleConfig,
    /// Load and validate the configuration
    CheckConfig,
    /// Queue a subject for dispatch
    Enqueue { type_tag: String, object_id: i64 },
    /// Remove a pending subject
    Cancel { type_tag: String, object_id: i64 },
    /// Show where a subject is in its delivery lifecycle
    Status { type_tag: String, object_id: i64 },
    /// Browse sent campaigns, newest first
    History {
        #[arg(long, default_value_t = 1)]
        page: i64,
    },
    /// Make entries with expired claims visible again
    RecoverClaims,
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    Ok(loader.load()?)
}

async fn open_queue(config: &AppConfig) -> Result<DispatchQueue> {
    Ok(DispatchQueue::from_config(&config.store).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep stdout clean for redirecting into a file
    if let Command::ExampleConfig = args.command {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    init_logging("mailroom-ctl");
    let config = load_config(args.config)?;
    execute(args.command, &config).await
}

async fn execute(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::ExampleConfig => print!("{}", AppConfig::example_toml()),
        Command::CheckConfig => {
            info!(
                store = %config.store.url,
                cache_backend = ?config.cache.backend,
                "Configuration is valid"
            );
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        Command::Enqueue { type_tag, object_id } => {
            let queue = open_queue(config).await?;
            let content_ref = ContentRef::new(type_tag, object_id);
            match queue.enqueue(&content_ref).await {
                Ok(entry) => println!("queued {} (sequence {})", content_ref, entry.sequence),
                Err(e @ (QueueError::AlreadyQueued(_) | QueueError::AlreadySent(_))) => {
                    println!("{}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Cancel { type_tag, object_id } => {
            let queue = open_queue(config).await?;
            let content_ref = ContentRef::new(type_tag, object_id);
            if queue.cancel(&content_ref).await? {
                println!("cancelled {}", content_ref);
            } else {
                println!("{} was not queued", content_ref);
            }
        }
        Command::Status { type_tag, object_id } => {
            let queue = open_queue(config).await?;
            let status = queue.resolver().resolve(&ContentRef::new(type_tag, object_id)).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::History { page } => {
            let queue = open_queue(config).await?;
            let per_page = config.pagination.per_page;
            let rows = queue.campaign_page(page, per_page).await?;
            let paginator = Paginator::new(&rows, page, |n| format!("--page {}", n))
                .per_page(per_page)
                .bullet_window(config.pagination.bullet_window);

            for record in paginator.objects() {
                println!(
                    "{}  {:<24} {}",
                    record.sent_at.format("%Y-%m-%d %H:%M:%S"),
                    record.content_ref.to_string(),
                    record.remote_campaign_id
                );
            }

            let bullets: Vec<String> = paginator
                .bullets()
                .iter()
                .map(|b| if b.active { format!("[{}]", b.number) } else { b.number.to_string() })
                .collect();
            println!(
                "page {} of {} ({} campaigns): {}",
                page,
                paginator.pages_count(),
                paginator.total_count(),
                bullets.join(" ")
            );
        }
        Command::RecoverClaims => {
            let queue = open_queue(config).await?;
            let recovered = queue.recover_expired_claims().await?;
            println!("recovered {} expired claims", recovered);
        }
    }

    Ok(())
}
