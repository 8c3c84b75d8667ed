use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{self, LimitPolicy, StopCondition, WorkloadKind};
use crate::logging::LogArgs;

#[derive(Debug, Clone, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable summary with raw counters and samples
    Text,
    /// One CSV row per counter slot and per jitter sample
    Csv,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    config::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Debug, Args)]
pub struct BenchArgs {
    /// Workload run by every worker thread
    #[arg(short = 'w', long, value_enum)]
    pub workload: Option<WorkloadKind>,

    /// Number of worker threads (max 1024)
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,

    /// Number of low-priority idle counters run alongside the workers (max 16)
    #[arg(short = 'b', long)]
    pub background: Option<usize>,

    /// Run duration (e.g. 500ms, 5s, 1m; bare number = seconds)
    #[arg(short = 'd', long, value_parser = parse_duration_arg)]
    pub duration: Option<Duration>,

    /// Jitter sampler period; repeat or comma-separate for several samplers
    #[arg(short = 'p', long = "period", value_delimiter = ',', value_parser = parse_duration_arg)]
    pub periods: Option<Vec<Duration>>,

    /// Samples collected by each jitter sampler
    #[arg(short = 's', long)]
    pub samples: Option<usize>,

    /// End the run after the duration, or once every sampler is full
    #[arg(long, value_enum)]
    pub stop: Option<StopCondition>,

    /// Stack size of each benchmark thread in bytes
    #[arg(long)]
    pub stack_size: Option<usize>,

    /// Nice value of worker threads
    #[arg(long, allow_negative_numbers = true)]
    pub worker_nice: Option<i32>,

    /// Nice value of background threads
    #[arg(long, allow_negative_numbers = true)]
    pub background_nice: Option<i32>,

    /// Nice value of sampler threads
    #[arg(long, allow_negative_numbers = true)]
    pub sampler_nice: Option<i32>,

    /// Rounds over the allocation size table per alloc worker
    #[arg(long)]
    pub alloc_rounds: Option<u32>,

    /// File whose descriptor dup workers duplicate
    #[arg(long)]
    pub dup_path: Option<PathBuf>,

    /// Cycle counter frequency in Hz (default: measured at startup)
    #[arg(long)]
    pub counter_frequency: Option<u64>,

    /// Clamp or refuse thread counts above the limits
    #[arg(long, value_enum)]
    pub limit_policy: Option<LimitPolicy>,
}

#[derive(Debug, Parser)]
#[command(name = "schedbench", about = "Scheduler jitter and throughput benchmark under synthetic load")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Report format
    #[arg(short = 'f', long = "format", value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    /// Write the report to a file instead of stdout
    #[arg(short = 'o', long = "output-file")]
    pub output_file: Option<PathBuf>,

    /// Configuration file path (default: /etc/schedbench.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub bench: BenchArgs,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Repeat the benchmark for several worker counts and compare per-worker throughput
    Sweep(SweepArgs),
}

#[derive(Debug, Parser)]
pub struct SweepArgs {
    /// Comma-separated worker counts, run in order
    #[arg(short = 'c', long, value_delimiter = ',', default_value = "1,2,4,8")]
    pub counts: Vec<usize>,

    /// Report format
    #[arg(short = 'f', long = "format", value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    /// Write the report to a file instead of stdout
    #[arg(short = 'o', long = "output-file")]
    pub output_file: Option<PathBuf>,

    /// Configuration file path (default: /etc/schedbench.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub bench: BenchArgs,

    #[command(flatten)]
    pub log: LogArgs,
}
