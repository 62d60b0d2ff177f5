use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use aocn_sync::{CommandStatus, CycleOutcome, Invoker, Notifier, NotifierConfig};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "aocn")]
#[command(about = "Advent of Code private leaderboard notifier")]
struct Cli {
    /// YAML config file; without it, settings come from AOCN_* environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll on the configured schedule until interrupted.
    Run,
    /// Run a single poll-diff-notify cycle.
    Poll,
    /// Link an Advent of Code user id to a Discord user.
    Link {
        #[arg(long)]
        aoc_id: u64,
        #[arg(long)]
        discord_id: String,
        #[arg(long)]
        username: Option<String>,
    },
    /// Remove the link held by a Discord user.
    Unlink {
        #[arg(long)]
        discord_id: String,
        #[arg(long)]
        username: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aocn=info,aocn_sync=info,aocn_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => NotifierConfig::from_yaml_file(path)?,
        None => NotifierConfig::from_env()?,
    };
    let notifier = Arc::new(Notifier::from_config(config)?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => notifier.run_until_shutdown().await?,
        Commands::Poll => match notifier.run_cycle().await? {
            CycleOutcome::Skipped => println!("poll skipped: another cycle is running"),
            CycleOutcome::NoChange => println!("poll complete: no changes"),
            CycleOutcome::Regression { backup } => println!(
                "poll complete: regression detected, cache backed up to {}",
                backup
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<nothing to back up>".to_string())
            ),
            CycleOutcome::Notified { events, finishers } => println!(
                "poll complete: notified events={events} finishers={}",
                finishers.len()
            ),
        },
        Commands::Link {
            aoc_id,
            discord_id,
            username,
        } => {
            let invoker = Invoker::new(discord_id.clone(), username.unwrap_or(discord_id));
            let reply = notifier.link_handler().link(&invoker, aoc_id).await;
            println!("{}", reply.content);
            if reply.status == CommandStatus::Failed {
                bail!("link failed");
            }
        }
        Commands::Unlink {
            discord_id,
            username,
        } => {
            let invoker = Invoker::new(discord_id.clone(), username.unwrap_or(discord_id));
            let reply = notifier.link_handler().unlink(&invoker).await;
            println!("{}", reply.content);
            if reply.status == CommandStatus::Failed {
                bail!("unlink failed");
            }
        }
    }

    Ok(())
}
