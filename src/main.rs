mod clock;
mod cli;
mod config;
mod error;
mod harness;
mod logging;
mod phase;
mod priority;
mod report;
mod sampler;
mod workload;

use std::path::Path;
use std::process;

use clap::Parser;

use cli::{BenchArgs, Cli, Command, ReportFormat};
use config::BenchConfig;
use error::Error;

/// Build a BenchConfig by layering: defaults → TOML file → CLI overrides.
///
/// A file named with `--config` must load; a broken `/etc/schedbench.toml` is
/// only warned about.
fn build_bench_config(config_file: Option<&Path>, args: &BenchArgs) -> Result<BenchConfig, Error> {
    let mut cfg = match config::load_config(config_file) {
        Ok(c) => c.bench,
        Err(e) if config_file.is_none() => {
            log::warn!("{}", e);
            BenchConfig::default()
        }
        Err(e) => return Err(e),
    };

    // Apply CLI overrides (only if explicitly set)
    if let Some(v) = args.workload {
        cfg.workload = v;
    }
    if let Some(v) = args.workers {
        cfg.workers = v;
    }
    if let Some(v) = args.background {
        cfg.background = v;
    }
    if let Some(v) = args.duration {
        cfg.duration = v;
    }
    if let Some(ref v) = args.periods {
        cfg.periods = v.clone();
    }
    if let Some(v) = args.samples {
        cfg.samples = v;
    }
    if let Some(v) = args.stop {
        cfg.stop = v;
    }
    if let Some(v) = args.stack_size {
        cfg.stack_size = v;
    }
    if let Some(v) = args.worker_nice {
        cfg.worker_nice = v;
    }
    if let Some(v) = args.background_nice {
        cfg.background_nice = v;
    }
    if let Some(v) = args.sampler_nice {
        cfg.sampler_nice = v;
    }
    if let Some(v) = args.alloc_rounds {
        cfg.alloc_rounds = v;
    }
    if let Some(ref v) = args.dup_path {
        cfg.dup_path = v.clone();
    }
    if let Some(v) = args.counter_frequency {
        cfg.counter_frequency_hz = Some(v);
    }
    if let Some(v) = args.limit_policy {
        cfg.limit_policy = v;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn run_single(cli: &Cli, bench: &BenchConfig) -> Result<(), Error> {
    let run = harness::run_benchmark(bench)?;
    report::write_report(&run, &cli.format, cli.output_file.as_deref())?;
    Ok(())
}

fn run_sweep(
    counts: &[usize],
    bench: &BenchConfig,
    format: &ReportFormat,
    output_file: Option<&Path>,
) -> Result<(), Error> {
    let runs = harness::sweep(bench, counts)?;
    report::write_sweep(&runs, format, output_file)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Some(Command::Sweep(args)) => {
            logging::init(&args.log);
            build_bench_config(args.config_file.as_deref(), &args.bench).and_then(|bench| {
                run_sweep(&args.counts, &bench, &args.format, args.output_file.as_deref())
            })
        }
        None => {
            logging::init(&cli.log);
            build_bench_config(cli.config_file.as_deref(), &cli.bench)
                .and_then(|bench| run_single(&cli, &bench))
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        process::exit(1);
    }
}
