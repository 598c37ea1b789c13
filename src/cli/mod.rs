//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// wanpulse - Multi-WAN bandwidth and latency prober
#[derive(Parser, Debug)]
#[command(
    name = "wanpulse",
    author,
    version,
    about = "Measures bandwidth, latency and loss per WAN egress path",
    long_about = r#"
wanpulse probes each configured WAN path independently by binding probe
sockets to that path's source address and marking packets with its DSCP
class, so policy routing steers each measurement out the right uplink.

QUICK START:
  One sweep:   wanpulse probe
  One path:    wanpulse probe --path wan2
  Scheduled:   wanpulse schedule
  Config:      wanpulse config --output wanpulse.toml
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one sweep (or one path) and print the results
    Probe(ProbeArgs),

    /// Run sweeps on the configured schedule until interrupted
    Schedule(ScheduleArgs),

    /// List configured paths
    Paths(PathsArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Probe command arguments
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Probe only the named path
    #[arg(short, long)]
    pub path: Option<String>,

    /// Probe all paths concurrently (biases throughput on shared links)
    #[arg(long)]
    pub parallel: bool,

    /// Print outcomes as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Schedule command arguments
#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Override the configured cron expression
    #[arg(short, long)]
    pub schedule: Option<String>,

    /// Run one sweep immediately before waiting for the first fire
    #[arg(long)]
    pub immediate: bool,
}

/// Paths command arguments
#[derive(Args, Debug)]
pub struct PathsArgs {
    /// Print paths as JSON
    #[arg(long)]
    pub json: bool,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output path; prints to stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
