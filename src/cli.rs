//! CLI definitions for the cronsync agent.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use cronsync_config::DEFAULT_CONFIG_PATH;

/// CronSync endpoint agent.
#[derive(Parser)]
#[command(name = "cronsync-agent")]
#[command(about = "Keeps the native job scheduler in sync with versioned job manifests")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "CRONSYNC_CONFIG", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the agent in the foreground (default)
    Run,

    /// Run a managed job and report its completion (invoked by the native scheduler)
    Checkin {
        /// Job UUID from the manifest
        #[arg(long)]
        id: Option<Uuid>,

        /// Job name
        #[arg(long)]
        name: String,

        /// Job namespace
        #[arg(long, default_value = cronsync_protocols::DEFAULT_NAMESPACE)]
        namespace: String,

        /// The job's own command line
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Parse a manifest tree offline and report every problem
    Validate {
        /// Directory containing job manifests
        dir: PathBuf,
    },

    /// Print the local scheduler inventory
    Discover {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Attach a cronsync identity to a discovered scheduler entry
    Adopt {
        /// Native handle as printed by `discover`
        #[arg(long)]
        handle: String,

        /// UUID the entry will be managed under
        #[arg(long)]
        id: Uuid,

        /// Job name
        #[arg(long)]
        name: String,

        /// Job namespace
        #[arg(long, default_value = cronsync_protocols::DEFAULT_NAMESPACE)]
        namespace: String,
    },

    /// Print version and platform information
    Version,
}
