//! Command-line interface for Locus.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Locus - location scoring over a trained model artifact.
#[derive(Parser)]
#[command(name = "locus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LOCUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "LOCUS_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        /// Bind address for the HTTP API
        #[arg(short, long, env = "LOCUS_BIND_ADDR")]
        bind: Option<SocketAddr>,

        /// Model artifact path
        #[arg(short, long, env = "LOCUS_ARTIFACT_PATH")]
        artifact: Option<PathBuf>,

        /// Load the artifact on first request instead of at startup
        #[arg(long, env = "LOCUS_LAZY_LOAD")]
        lazy: bool,

        /// Emit logs as JSON
        #[arg(long, env = "LOCUS_JSON_LOGS")]
        json_logs: bool,

        /// Disable the Prometheus exporter
        #[arg(long)]
        no_metrics: bool,
    },

    /// Print a model artifact's description
    Inspect {
        /// Model artifact path
        artifact: PathBuf,
    },

    /// Show version information
    Version,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
