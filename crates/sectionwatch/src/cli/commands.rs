//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::navigation::ProgressMode;
use crate::visibility::Millis;

/// Replay command arguments.
#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// Scenario file (JSON)
    pub file: PathBuf,

    /// Output the full report as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Progress measurement (defaults to the configured mode)
    #[arg(short, long, value_enum)]
    pub progress: Option<ProgressArg>,

    /// Override the debounce settling window
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<Millis>,

    /// Override the navigation suppression window
    #[arg(long, value_name = "MS")]
    pub suppress_ms: Option<Millis>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the standard location)
        file: Option<PathBuf>,
    },
}

/// Progress measurement argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProgressArg {
    /// Document scroll ratio
    Scroll,
    /// Position of the active anchor
    Section,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Scroll => Self::Scroll,
            ProgressArg::Section => Self::Section,
        }
    }
}
