//! Command-line grammar.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// bhyve VM manager driven by zfs volume properties
#[derive(Parser, Debug)]
#[command(name = "bheekeeper", version, about = "bhyve VM manager driven by zfs volume properties")]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List known VMs; running ones are marked with `*`
    List,

    /// Show detailed status of a VM
    Status {
        /// VM name
        name: String,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Boot a VM and attach its serial console to this terminal
    Run {
        /// VM name
        name: String,

        /// File whose lines are typed into the boot loader instead of `grub:in`
        #[arg(long, value_name = "FILE")]
        boot_script: Option<PathBuf>,

        /// Pause between boot script lines
        #[arg(long, value_name = "MS", default_value_t = 1000, requires = "boot_script")]
        script_interval_ms: u64,
    },

    /// Destroy a running or loaded VM
    Destroy {
        /// VM name
        name: String,
    },

    /// Create a volume for a new VM
    Create {
        /// VM name
        name: String,

        /// Volume dataset to create, e.g. `zroot/vm/web01`
        volume: String,

        /// Volume size in megabytes
        #[arg(long, value_name = "MB", default_value_t = 10240)]
        size_mb: u64,
    },
}
