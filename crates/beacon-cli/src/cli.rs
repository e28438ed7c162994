use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Record safety check-ins and alerts, online or not")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a safety check-in
    #[command(alias = "ci")]
    Checkin {
        #[arg(value_enum)]
        status: StatusArg,
        /// Latitude in decimal degrees
        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,
        /// Longitude in decimal degrees
        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,
        /// Owning user id
        #[arg(long, value_name = "ID")]
        user: Option<String>,
    },
    /// Show check-in history
    History {
        /// Number of check-ins to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only check-ins not yet replicated
        #[arg(long)]
        unsynced: bool,
        /// Delete the whole local history instead
        #[arg(long, conflicts_with_all = ["unsynced", "json"])]
        clear: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Raise an emergency alert
    Alert {
        /// Alert title
        #[arg(required = true)]
        title: Vec<String>,
        /// Longer description
        #[arg(short, long)]
        message: Option<String>,
        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,
        /// Map image to attach (PNG or JPEG, at most 500 KB)
        #[arg(long, value_name = "PATH", requires = "lat")]
        map_image: Option<PathBuf>,
    },
    /// Manage emergency contacts
    Contacts {
        #[command(subcommand)]
        command: ContactsCommands,
    },
    /// Show what is waiting to be delivered
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Drop everything waiting instead
        #[arg(long, conflicts_with = "json")]
        clear: bool,
    },
    /// Resources kept for offline use
    Saved {
        #[command(subcommand)]
        command: SavedCommands,
    },
    /// Deliver queued items and replicate check-ins once
    Sync,
    /// Keep syncing until interrupted
    Watch,
    /// Offline login credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Safe,
    Help,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ContactsCommands {
    /// Add a contact
    Add {
        name: String,
        phone: String,
        /// e.g. sister, neighbour
        #[arg(long)]
        relationship: Option<String>,
    },
    /// List contacts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a contact by id
    Remove { id: String },
    /// Merge contacts with the server copy
    Sync,
}

#[derive(Subcommand)]
pub enum SavedCommands {
    /// Save a JSON value under a key, replacing any previous one
    Put { key: String, value: String },
    /// Print the value saved under a key
    Get { key: String },
    /// List saved keys
    List,
    /// Forget a saved value
    Remove { key: String },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Remember a password the server just accepted
    Remember {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Check a password against the remembered one
    Verify {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Forget remembered credentials
    Forget {
        #[arg(long)]
        username: String,
    },
}
