//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::report::ReportArgs;

/// Machine run usage reports.
///
/// Pairs machine ON/OFF events into production runs and reports the
/// quantity produced per product, machine and run.
#[derive(Debug, Parser)]
#[command(name = "rr", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import products, machines and events as JSONL from stdin.
    Import,

    /// Generate a usage report.
    Report(ReportArgs),

    /// Show database status.
    Status,
}
