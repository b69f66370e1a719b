use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use fieldwatch_core::models::{MutationStatus, RecognitionStatus};
use fieldwatch_core::EntityType;

#[derive(Parser)]
#[command(name = "fieldwatch")]
#[command(about = "Drive the Fieldwatch offline sync core from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the CLI config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, update, delete and list domain records
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Inspect and manage the mutation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Queue and inspect pest recognition jobs
    Recognition {
        #[command(subcommand)]
        command: RecognitionCommands,
    },
    /// Push queued work to the backend
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Manage the CLI config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Entity names accepted on the command line
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EntityArg {
    Fazenda,
    Talhao,
    Scout,
    Praga,
    Activity,
}

impl From<EntityArg> for EntityType {
    fn from(value: EntityArg) -> Self {
        match value {
            EntityArg::Fazenda => Self::Fazenda,
            EntityArg::Talhao => Self::Talhao,
            EntityArg::Scout => Self::Scout,
            EntityArg::Praga => Self::Praga,
            EntityArg::Activity => Self::Activity,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueueStatusArg {
    Pending,
    Processing,
    Failed,
}

impl From<QueueStatusArg> for MutationStatus {
    fn from(value: QueueStatusArg) -> Self {
        match value {
            QueueStatusArg::Pending => Self::Pending,
            QueueStatusArg::Processing => Self::Processing,
            QueueStatusArg::Failed => Self::Failed,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RecognitionStatusArg {
    Pending,
    Processing,
    Done,
    Error,
}

impl From<RecognitionStatusArg> for RecognitionStatus {
    fn from(value: RecognitionStatusArg) -> Self {
        match value {
            RecognitionStatusArg::Pending => Self::Pending,
            RecognitionStatusArg::Processing => Self::Processing,
            RecognitionStatusArg::Done => Self::Done,
            RecognitionStatusArg::Error => Self::Error,
        }
    }
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Create a record and queue its upload
    Create {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Record fields as a JSON object
        #[arg(long, value_name = "JSON")]
        json: String,
    },
    /// Update fields of an existing record
    Update {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Record ID
        id: String,
        /// Fields to change as a JSON object
        #[arg(long, value_name = "JSON")]
        json: String,
    },
    /// Soft delete a record and queue the deletion
    Delete {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Record ID
        id: String,
    },
    /// List live records, most recently updated first
    List {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show sync counters
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued mutations
    List {
        /// Only entries with this status
        #[arg(long, value_enum)]
        status: Option<QueueStatusArg>,
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset a failed entry (or all of them) for another attempt
    Retry {
        /// Queue entry ID
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,
        /// Retry every failed entry
        #[arg(long)]
        all: bool,
    },
    /// Drop a failed entry from the queue
    Discard {
        /// Queue entry ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum RecognitionCommands {
    /// Queue an image for pest recognition
    Add {
        /// Path to the captured image
        image: PathBuf,
        /// Context for the job as a JSON object
        #[arg(long, value_name = "JSON")]
        metadata: Option<String>,
    },
    /// List recognition jobs
    List {
        /// Only jobs with this status
        #[arg(long, value_enum)]
        status: Option<RecognitionStatusArg>,
        /// Number of jobs to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Requeue a job that ended in error
    Retry {
        /// Recognition job ID
        id: String,
    },
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct RemoteArgs {
    /// Backend base URL
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,
    /// Bearer token for the backend
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,
    /// Health URL probed for connectivity
    #[arg(long, value_name = "URL")]
    pub health_url: Option<String>,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Run one drain cycle of both queues
    Once {
        #[command(flatten)]
        remote: RemoteArgs,
        /// Output the cycle reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until Ctrl-C
    Daemon {
        #[command(flatten)]
        remote: RemoteArgs,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update the config file
    Init {
        /// Backend base URL
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,
        /// Health URL probed for connectivity
        #[arg(long, value_name = "URL")]
        health_url: Option<String>,
        /// Default local database path
        #[arg(long, value_name = "PATH")]
        database: Option<PathBuf>,
    },
    /// Print the effective configuration
    Show,
}
