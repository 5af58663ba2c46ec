use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "nicolive-relay",
    version,
    about = "Relay niconico live comments of configured channels to stdout"
)]
pub struct Args {
    /// Configuration file (defaults to <config dir>/nicolive/config.toml)
    #[arg(short, long, env = "NICOLIVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Only relay these channel ids (repeatable); all configured channels by default
    #[arg(long = "channel", value_name = "ID")]
    pub channels: Vec<String>,

    /// Output format of relayed comments
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    /// Print session statistics every N seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub stats_interval: u64,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line
    Json,
    /// Human-readable lines
    Pretty,
}
