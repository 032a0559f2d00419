//! Command-line interface for the vnc IR tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vnc::Format;

#[derive(Parser)]
#[command(name = "vnc")]
#[command(about = "Inspect and verify persisted visual-novel IR", long_about = None)]
pub struct Cli {
    /// Log structural IR events while loading
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print an IR document
    Print {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Check the structural invariants of an IR document
    #[command(alias = "check")]
    Verify { file: PathBuf },
}
