// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: The bare command runs the daemon; subcommands cover version and updates.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rad")]
#[command(about = "Host-resident review-app deploy agent")]
#[command(version)]
pub struct Cli {
    /// Run in dev mode: local paths, proxy disabled, relaxed health checks
    #[arg(long, global = true)]
    pub dev: bool,

    /// Auth token (dev mode)
    #[arg(long)]
    pub token: Option<String>,

    /// Override the listen address
    #[arg(long)]
    pub listen: Option<String>,

    /// Path to config.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print version information
    Version,

    /// Check for and install agent updates
    Update {
        /// Only check for updates, do not install
        #[arg(long)]
        check: bool,

        /// Skip the confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
    },
}
