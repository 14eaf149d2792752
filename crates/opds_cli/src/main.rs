//! opds CLI: generates OPDS catalogs from a Calibre library export.
//!
//! Provides `opds build` for incremental catalog generation and
//! `opds cache` for inspecting or clearing the persisted checksum cache.

#![warn(missing_docs)]

mod build;
mod cache;
mod feed;
mod library;
mod listener;
mod stages;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use opds_config::{Profile, PROFILE_FILE_NAME};

/// opds: incremental OPDS catalog generator.
#[derive(Parser, Debug)]
#[command(name = "opds", version, about = "OPDS catalog generator")]
pub struct Cli {
    /// Print errors only; no stage lines or warnings.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print stage starts and debug logs as well.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `opds.toml` profile.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// `opds` subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate or refresh the catalog.
    Build(BuildArgs),
    /// Inspect or clear the checksum cache.
    Cache {
        /// What to do with the cache.
        #[command(subcommand)]
        action: CacheCommand,
    },
}

/// Arguments for the `opds build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Publish into this folder instead of the profile's output root.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Read this metadata export instead of the profile's.
    #[arg(short, long)]
    pub metadata: Option<String>,

    /// Delete the checksum cache before building.
    #[arg(long)]
    pub fresh: bool,
}

/// `opds cache` actions.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
    /// Delete the persisted checksum cache.
    Clear,
    /// Show what the persisted checksum cache holds.
    Stats,
}

/// Flags shared by every subcommand.
pub struct GlobalArgs {
    /// `--quiet`.
    pub quiet: bool,
    /// `--verbose`.
    pub verbose: bool,
    /// `--config`.
    pub config: Option<String>,
}

impl GlobalArgs {
    /// The profile path: `--config` if given, else `opds.toml` in the
    /// current directory.
    pub fn profile_path(&self) -> PathBuf {
        match &self.config {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(PROFILE_FILE_NAME),
        }
    }

    /// Loads the profile named by [`profile_path`](Self::profile_path).
    pub fn load_profile(&self) -> Result<Profile, Box<dyn std::error::Error>> {
        let path = self.profile_path();
        opds_config::load_profile(&path)
            .map_err(|e| format!("cannot load profile {}: {e}", path.display()).into())
    }
}

fn init_logging(global: &GlobalArgs) {
    let default = if global.quiet {
        "error"
    } else if global.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_logging(&global);

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Cache { action } => cache::run(action, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
