use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "asset-repair")]
#[command(about = "Verify a game installation and build its repair worklist", long_about = None)]
pub struct Cli {
    /// Check existence and size only, skipping digests
    #[arg(long, global = true)]
    pub fast: bool,

    /// Worker threads (0 = one per core)
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a full verification pass and print the repair worklist
    Check {
        /// Print the worklist as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Only look for redundant files (deletion lists, stale diffs)
    ScanRedundant,
    /// Only move misplaced persistent audio/video back to streaming assets
    Migrate,
    /// Print a CDN URL pinned to a revision
    PinUrl { base: String, revision: String },
    /// Print configuration values
    PrintConfig,
}
