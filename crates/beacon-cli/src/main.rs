//! Beacon CLI - Safety check-ins from the terminal
//!
//! Every command works offline against the local store. `sync` and `watch`
//! reach the server once `BEACON_API_URL`, `BEACON_CHANGE_FEED_URL` and
//! `BEACON_TOKEN` are set.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::alert::run_alert;
use crate::commands::auth::run_auth;
use crate::commands::checkin::run_checkin;
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::contacts::run_contacts;
use crate::commands::history::run_history;
use crate::commands::queue::{clear_queues, run_queue};
use crate::commands::saved::run_saved;
use crate::commands::sync::{run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("beacon=info,beacon_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Checkin {
            status,
            lat,
            lon,
            user,
        } => run_checkin(status, lat.zip(lon), user, &db_path).await?,
        Commands::History {
            limit,
            unsynced,
            clear,
            json,
        } => run_history(limit, unsynced, clear, json, &db_path).await?,
        Commands::Alert {
            title,
            message,
            lat,
            lon,
            map_image,
        } => {
            run_alert(
                &title,
                message,
                lat.zip(lon),
                map_image.as_deref(),
                &db_path,
            )
            .await?;
        }
        Commands::Contacts { command } => run_contacts(command, &db_path).await?,
        Commands::Queue { clear: true, .. } => {
            let cleared = clear_queues(&db_path).await?;
            println!("Dropped {cleared} queued items");
        }
        Commands::Queue { json, .. } => run_queue(json, &db_path).await?,
        Commands::Saved { command } => run_saved(command, &db_path).await?,
        Commands::Sync => run_sync(&db_path).await?,
        Commands::Watch => run_watch(&db_path).await?,
        Commands::Auth { command } => run_auth(command, &db_path).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
