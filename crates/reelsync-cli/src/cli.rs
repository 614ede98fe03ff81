use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "reelsync")]
#[command(about = "Keep a movie watchlist in sync across devices, offline first")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Work against the local replica only, even if a remote is configured
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add an item to the watchlist (re-adding resets watched and notes)
    Add {
        /// Catalog item ID
        item_id: String,
        /// Display title
        #[arg(required = true, trailing_var_arg = true)]
        title: Vec<String>,
        /// Poster image reference
        #[arg(long, value_name = "REF", default_value = "")]
        image: String,
    },
    /// Remove an item from the watchlist
    #[command(alias = "rm")]
    Remove {
        /// Catalog item ID
        item_id: String,
    },
    /// List watchlist items, most recently added first
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Include removed items that are still tracked for sync
        #[arg(long)]
        all: bool,
    },
    /// Toggle the watched flag of an item
    Watched {
        /// Catalog item ID
        item_id: String,
    },
    /// Set or clear the personal notes of an item
    Notes {
        /// Catalog item ID
        item_id: String,
        /// Note text; omit to clear
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Run a sync pass against the remote authority
    Sync,
    /// Show replica and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print this replica's device ID
    Device,
}
