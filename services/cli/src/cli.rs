//! Command-line interface for chalkboard.

use clap::{Parser, Subcommand};

/// Turns a topic into a narrated, animated lesson video.
#[derive(Parser, Debug)]
#[command(name = "chalkboard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run (or resume) the lesson pipeline for a topic
    Run {
        /// Topic to teach, e.g. "Neural Networks"
        topic: String,
    },
    /// Remove cached results for a topic
    ClearCache {
        topic: String,
        /// Remove only this key (e.g. step_0_storyboard) instead of everything
        #[arg(long)]
        key: Option<String>,
    },
    /// Report which external programs are available
    CheckEnv,
}
