//! reelsync CLI - a command-line watchlist replica
//!
//! Every invocation opens the local replica, pulls from the remote authority
//! when one is configured, runs the command and pushes what changed.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use reelsync_core::{RemoteConfig, SyncSettings};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_db_path, Session};
use crate::commands::edit::{run_notes, run_toggle_watched};
use crate::commands::list::run_list;
use crate::commands::remove::run_remove;
use crate::commands::status::{run_device, run_status};
use crate::commands::sync::{run_sync, run_sync_conflicts};
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
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("reelsync=info,reelsync_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path)?;
    let settings = SyncSettings::from_env()?;
    let remote = if cli.offline {
        None
    } else {
        RemoteConfig::from_env()?
    };

    let session = Session::open(&db_path, settings, remote).await?;
    let result = dispatch(&session, cli.command).await;
    session.finish().await;
    result
}

async fn dispatch(session: &Session, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Add {
            item_id,
            title,
            image,
        } => run_add(session, &item_id, &title, &image).await,
        Commands::Remove { item_id } => run_remove(session, &item_id).await,
        Commands::List { json, all } => run_list(session, json, all).await,
        Commands::Watched { item_id } => run_toggle_watched(session, &item_id).await,
        Commands::Notes { item_id, text } => run_notes(session, &item_id, &text).await,
        Commands::Sync => run_sync(session).await,
        Commands::Status { json } => run_status(session, json).await,
        Commands::Conflicts { limit, json } => run_sync_conflicts(session, limit, json).await,
        Commands::Device => {
            run_device(session);
            Ok(())
        }
    }
}
