//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;
use seedbox_core::OrchestratorConfig;

/// Default simulated size of a session without metadata (64 MiB).
const DEFAULT_SIMULATED_SIZE: u64 = 64 * 1024 * 1024;

/// Default simulated bytes per tick for each running session (4 MiB).
const DEFAULT_SIMULATED_RATE: u64 = 4 * 1024 * 1024;

/// Run torrent sessions under memory and concurrency budgets.
///
/// Seedbox admits sessions against a memory ceiling and a concurrency limit,
/// tracks their progress, and restarts transfers that stall. This binary
/// drives the orchestrator against a simulated transfer backend and prints a
/// JSON report of every session when it finishes.
#[derive(Parser, Debug)]
#[command(name = "seedbox")]
#[command(author, version, about)]
pub struct Args {
    /// Magnet URIs, paths to .torrent files, or http(s) URLs of .torrent files
    pub descriptors: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/seedbox/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Memory ceiling in bytes (0 = unlimited)
    #[arg(short = 'm', long)]
    pub max_memory: Option<u64>,

    /// Maximum sessions running at once (0 = unlimited)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(0..=1000))]
    pub max_concurrent: Option<u16>,

    /// Do not start sessions when their metadata arrives
    #[arg(long)]
    pub no_auto_start: bool,

    /// Do not restart stalled sessions
    #[arg(long)]
    pub no_auto_retry: bool,

    /// Seconds between health sweeps (0 disables)
    #[arg(long)]
    pub health_interval: Option<u64>,

    /// Directory for cached .torrent descriptors
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Number of simulation ticks to run
    #[arg(short = 't', long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(0..=100_000))]
    pub ticks: u32,

    /// Milliseconds between simulation ticks
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..=60_000))]
    pub tick_ms: u64,

    /// Simulated bytes transferred per tick by each running session
    #[arg(long, default_value_t = DEFAULT_SIMULATED_RATE)]
    pub rate: u64,

    /// Simulated size of each session in bytes
    #[arg(long, default_value_t = DEFAULT_SIMULATED_SIZE)]
    pub size: u64,
}

impl Args {
    /// Applies flag overrides on top of a file or default config.
    pub fn apply_overrides(&self, config: &mut OrchestratorConfig) {
        if let Some(max_memory) = self.max_memory {
            config.max_memory_bytes = max_memory;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_sessions = usize::from(max_concurrent);
        }
        if self.no_auto_start {
            config.auto_start = false;
        }
        if self.no_auto_retry {
            config.enable_auto_retry = false;
        }
        if let Some(interval) = self.health_interval {
            config.health_check_interval_secs = interval;
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = Some(cache_dir.clone());
        }
    }
}
