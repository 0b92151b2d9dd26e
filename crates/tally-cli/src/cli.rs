use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Offline-first client for record-oriented business data")]
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
    /// Create a new record
    #[command(alias = "new")]
    Add {
        /// Collection the record belongs to
        collection: String,
        /// Business fields as key=value pairs (values parsed as JSON when possible)
        fields: Vec<String>,
    },
    /// List records in a collection
    List {
        /// Collection name
        collection: String,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Serve from the local store without refreshing from the remote
        #[arg(long)]
        local: bool,
    },
    /// Show a single record
    Show {
        /// Record ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing record
    Edit {
        /// Record ID or unique ID prefix
        id: String,
        /// Fields to set as key=value pairs; opens $EDITOR when omitted
        fields: Vec<String>,
    },
    /// Delete an existing record
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Replay queued mutations against the remote service
    Push,
    /// Show queued mutation counts
    Status,
    /// Open the local store and reconcile its schema
    Migrate,
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
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
