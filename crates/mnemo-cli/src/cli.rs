use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use mnemo_core::ConflictStrategy;

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(about = "Local notes kept in sync with a remote note service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional path to the local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Account to use instead of the active one
    #[arg(long, global = true, value_name = "NAME")]
    pub account: Option<String>,

    /// Quick capture: mnemo "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note title
        #[arg(short, long)]
        title: Option<String>,
        /// Tag to attach (repeatable)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Note text
        content: Vec<String>,
    },
    /// List notes, newest first
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Filter notes by tag name
        #[arg(long)]
        tag: Option<String>,
        /// Show deleted notes that can still be restored
        #[arg(long)]
        deleted: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one note
    Show {
        /// Note ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing note; opens $EDITOR without flags
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New text
        #[arg(long)]
        text: Option<String>,
        /// Tag to add (repeatable)
        #[arg(long = "add-tag", value_name = "TAG")]
        add_tags: Vec<String>,
        /// Tag to remove (repeatable)
        #[arg(long = "remove-tag", value_name = "TAG")]
        remove_tags: Vec<String>,
    },
    /// Delete an existing note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
        /// Drop the note locally without telling the remote
        #[arg(long)]
        permanent: bool,
    },
    /// Undo a delete the remote has not confirmed yet
    Restore {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Keep a conflict note as a normal note
    Resolve {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Synchronize with the remote account
    Sync,
    /// Wipe the local store; the next sync downloads everything again
    FullResync {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Manage remote accounts
    #[command(subcommand)]
    Account(AccountCommands),
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Add an index-style bucket account
    AddBucket {
        /// Account name
        name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        app_id: String,
        #[arg(long)]
        api_key: String,
        /// Trash deleted notes and then remove them for good
        #[arg(long)]
        permanent_delete: bool,
    },
    /// Add an item-sync account
    AddItemSync {
        /// Account name
        name: String,
        /// Server base URL
        #[arg(long)]
        server: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Add an account that never talks to a server
    AddOffline {
        /// Account name
        name: String,
    },
    /// Make an account the active one
    Use {
        /// Account name
        name: String,
    },
    /// List configured accounts
    List,
    /// Set how diverged notes are reconciled
    Strategy {
        #[arg(value_enum)]
        strategy: StrategyArg,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    KeepLocal,
    KeepRemote,
    KeepBoth,
}

impl From<StrategyArg> for ConflictStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::KeepLocal => Self::KeepLocal,
            StrategyArg::KeepRemote => Self::KeepRemote,
            StrategyArg::KeepBoth => Self::KeepBoth,
        }
    }
}
