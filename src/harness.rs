use std::any::Any;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;

use crate::clock::{self, CycleCount};
use crate::config::{BenchConfig, StopCondition, WorkloadKind};
use crate::error::Error;
use crate::phase::{Epoch, PhaseController, PhaseState};
use crate::priority;
use crate::sampler::{self, JitterSeries, SamplerSpec};
use crate::workload::{self, idle::IdleCounter, CounterCell, Workload, WorkerOutcome, WorkloadContext};

/// How often the orchestrator re-checks its stop condition while holding.
const HOLD_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    Worker,
    Background,
    Sampler,
}

impl ThreadRole {
    pub fn name(&self) -> &'static str {
        match self {
            ThreadRole::Worker => "worker",
            ThreadRole::Background => "background",
            ThreadRole::Sampler => "sampler",
        }
    }
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final state of one counter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotResult {
    pub index: usize,
    pub count: u64,
    pub outcome: WorkerOutcome,
}

/// Everything a finished run produced. Built after every thread is joined.
#[derive(Debug, Clone)]
pub struct BenchmarkRun {
    pub workload: WorkloadKind,
    pub duration: Duration,
    pub elapsed_cycles: u64,
    pub counter_frequency_hz: u64,
    pub workers: Vec<SlotResult>,
    pub background: Vec<SlotResult>,
    pub samplers: Vec<JitterSeries>,
}

impl BenchmarkRun {
    /// Time between release and stop, per the cycle counter.
    pub fn elapsed_seconds(&self) -> f64 {
        clock::elapsed_seconds(
            CycleCount(0),
            CycleCount(self.elapsed_cycles),
            self.counter_frequency_hz,
        )
    }

    pub fn total_ops(&self) -> u64 {
        self.workers.iter().map(|s| s.count).sum()
    }

    pub fn mean_per_worker(&self) -> f64 {
        if self.workers.is_empty() {
            return 0.0;
        }
        self.total_ops() as f64 / self.workers.len() as f64
    }

    pub fn ops_per_second(&self) -> f64 {
        let secs = self.elapsed_seconds();
        if secs < f64::EPSILON {
            return 0.0;
        }
        self.total_ops() as f64 / secs
    }

    /// Slots whose counters stopped short because of a resource failure.
    pub fn partial_slots(&self) -> impl Iterator<Item = (ThreadRole, &SlotResult)> {
        let workers = self.workers.iter().map(|s| (ThreadRole::Worker, s));
        let background = self.background.iter().map(|s| (ThreadRole::Background, s));
        workers
            .chain(background)
            .filter(|(_, s)| s.outcome.is_partial())
    }
}

/// Runs one benchmark with the workload named in `config`.
pub fn run_benchmark(config: &BenchConfig) -> Result<BenchmarkRun, Error> {
    let mut config = config.clone();
    config.validate()?;

    let dup_file = match config.workload {
        WorkloadKind::Dup => Some(open_shared_descriptor(&config)?),
        _ => None,
    };
    let ctx = WorkloadContext::new(&config, dup_file.as_ref().map(|f| f.as_raw_fd()));

    // `dup_file` outlives every worker: all threads are joined before this returns.
    run_benchmark_with(&config, |slot| workload::build(slot, &ctx))
}

/// Runs one benchmark with worker bodies from `factory`, called once per
/// worker slot before any thread starts.
pub fn run_benchmark_with<F>(config: &BenchConfig, factory: F) -> Result<BenchmarkRun, Error>
where
    F: Fn(usize) -> Result<Box<dyn Workload>, Error>,
{
    let mut config = config.clone();
    config.validate()?;
    let builder = thread_builder(&config);
    execute(&config, factory, &builder)
}

/// Repeats the run once per worker count, in order.
pub fn sweep(config: &BenchConfig, counts: &[usize]) -> Result<Vec<BenchmarkRun>, Error> {
    if counts.is_empty() {
        return Err(Error::InvalidConfig("sweep needs at least one worker count".into()));
    }
    counts
        .iter()
        .map(|&workers| {
            let cfg = BenchConfig {
                workers,
                ..config.clone()
            };
            run_benchmark(&cfg)
        })
        .collect()
}

fn open_shared_descriptor(config: &BenchConfig) -> Result<File, Error> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.dup_path)
        .map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("cannot open {}: {}", config.dup_path.display(), e),
            ))
        })
}

/// Produces the thread builder for one slot.
type BuildThread<'a> = dyn Fn(ThreadRole, usize) -> io::Result<thread::Builder> + 'a;

/// Names each thread after its role and slot, with the configured stack size.
fn thread_builder(config: &BenchConfig) -> impl Fn(ThreadRole, usize) -> io::Result<thread::Builder> {
    let stack_size = config.stack_size;
    move |role, index| {
        Ok(thread::Builder::new()
            .name(format!("{}-{}", role, index))
            .stack_size(stack_size))
    }
}

fn spawn_slot<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    builder: &BuildThread<'_>,
    role: ThreadRole,
    index: usize,
    body: F,
) -> Result<ScopedJoinHandle<'scope, T>, Error>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    builder(role, index)
        .and_then(|b| b.spawn_scoped(scope, body))
        .map_err(|source| Error::Spawn {
            role,
            index,
            source,
        })
}

struct Handles<'scope> {
    workers: Vec<ScopedJoinHandle<'scope, WorkerOutcome>>,
    background: Vec<ScopedJoinHandle<'scope, WorkerOutcome>>,
    samplers: Vec<ScopedJoinHandle<'scope, JitterSeries>>,
}

impl Handles<'_> {
    fn len(&self) -> usize {
        self.workers.len() + self.background.len() + self.samplers.len()
    }
}

/// Releases and immediately stops whatever did start before a spawn failure,
/// then joins it. The phase still passes through Running.
fn abort_spawned(phase: &PhaseController, handles: Handles<'_>) {
    phase.start();
    phase.stop();
    join_role(ThreadRole::Worker, handles.workers);
    join_role(ThreadRole::Background, handles.background);
    join_role(ThreadRole::Sampler, handles.samplers);
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("thread panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("thread panicked: {}", s)
    } else {
        "thread panicked".to_string()
    }
}

/// Joins every handle in order before looking at any result, so a failed
/// thread never leaves the others unjoined.
fn join_role<T>(
    role: ThreadRole,
    handles: Vec<ScopedJoinHandle<'_, T>>,
) -> Vec<Result<T, Error>> {
    handles
        .into_iter()
        .enumerate()
        .map(|(index, h)| {
            h.join().map_err(|payload| Error::Join {
                role,
                index,
                reason: panic_reason(payload.as_ref()),
            })
        })
        .collect()
}

fn slot_results(
    cells: &[CounterCell],
    outcomes: Vec<Result<WorkerOutcome, Error>>,
) -> Result<Vec<SlotResult>, Error> {
    outcomes
        .into_iter()
        .zip(cells)
        .enumerate()
        .map(|(index, (outcome, cell))| {
            Ok(SlotResult {
                index,
                count: cell.get(),
                outcome: outcome?,
            })
        })
        .collect()
}

/// Holds the run open until the duration has elapsed on the cycle counter,
/// or every sampler is done when the run stops on samplers.
fn hold(
    config: &BenchConfig,
    phase: &PhaseController,
    epoch: Epoch,
    frequency_hz: u64,
    samplers_done: &AtomicUsize,
) -> CycleCount {
    let deadline = epoch
        .cycles
        .0
        .saturating_add(clock::cycles_for(config.duration, frequency_hz));
    let wait_for_samplers = config.stop == StopCondition::Samplers;

    while phase.is_running() {
        let now = clock::now();
        if now.0 >= deadline {
            return now;
        }
        if wait_for_samplers && samplers_done.load(Ordering::Acquire) >= config.periods.len() {
            return now;
        }
        thread::sleep(HOLD_POLL_INTERVAL);
    }
    clock::now()
}

/// State borrowed by every thread of one run.
struct Shared<'env> {
    config: &'env BenchConfig,
    builder: &'env BuildThread<'env>,
    frequency_hz: u64,
    phase: &'env PhaseController,
    samplers_done: &'env AtomicUsize,
    worker_cells: &'env [CounterCell],
    background_cells: &'env [CounterCell],
}

/// Spawns workers, then background tasks, then samplers. Stops at the first
/// failure; whatever was spawned is left in `handles`.
fn spawn_all<'scope, 'env>(
    s: &'scope Scope<'scope, 'env>,
    shared: &Shared<'env>,
    workloads: Vec<Box<dyn Workload>>,
    handles: &mut Handles<'scope>,
) -> Result<(), Error> {
    let config = shared.config;
    let builder = shared.builder;
    let phase = shared.phase;
    let samplers_done = shared.samplers_done;
    let frequency_hz = shared.frequency_hz;

    for (index, (mut task, cell)) in workloads.into_iter().zip(shared.worker_cells).enumerate() {
        let nice = config.worker_nice;
        let handle = spawn_slot(s, builder, ThreadRole::Worker, index, move || {
            priority::apply("worker", index, nice);
            workload::drive(index, phase, cell, &mut task)
        })?;
        handles.workers.push(handle);
    }

    for (index, cell) in shared.background_cells.iter().enumerate() {
        let nice = config.background_nice;
        let handle = spawn_slot(s, builder, ThreadRole::Background, index, move || {
            priority::apply("background", index, nice);
            workload::drive(index, phase, cell, &mut IdleCounter)
        })?;
        handles.background.push(handle);
    }

    for (index, &period) in config.periods.iter().enumerate() {
        let nice = config.sampler_nice;
        let spec = SamplerSpec {
            period,
            cap: config.samples,
        };
        let handle = spawn_slot(s, builder, ThreadRole::Sampler, index, move || {
            priority::apply("sampler", index, nice);
            sampler::run_sampler(index, spec, frequency_hz, phase, samplers_done)
        })?;
        handles.samplers.push(handle);
    }
    Ok(())
}

fn execute<F>(
    config: &BenchConfig,
    factory: F,
    builder: &BuildThread<'_>,
) -> Result<BenchmarkRun, Error>
where
    F: Fn(usize) -> Result<Box<dyn Workload>, Error>,
{
    let frequency_hz = config
        .counter_frequency_hz
        .unwrap_or_else(clock::counter_frequency);

    let workloads = (0..config.workers)
        .map(&factory)
        .collect::<Result<Vec<_>, _>>()?;
    let worker_cells: Vec<CounterCell> = (0..config.workers).map(|_| CounterCell::new()).collect();
    let background_cells: Vec<CounterCell> =
        (0..config.background).map(|_| CounterCell::new()).collect();
    let phase = PhaseController::new();
    let samplers_done = AtomicUsize::new(0);

    let shared = Shared {
        config,
        builder,
        frequency_hz,
        phase: &phase,
        samplers_done: &samplers_done,
        worker_cells: &worker_cells,
        background_cells: &background_cells,
    };

    log::info!(
        target: "schedbench::harness",
        "run: workload={} workers={} background={} samplers={} duration={:?} counter={}Hz",
        config.workload.name(),
        config.workers,
        config.background,
        config.periods.len(),
        config.duration,
        frequency_hz,
    );

    thread::scope(|s| -> Result<BenchmarkRun, Error> {
        let mut handles = Handles {
            workers: Vec::with_capacity(config.workers),
            background: Vec::with_capacity(config.background),
            samplers: Vec::with_capacity(config.periods.len()),
        };

        if let Err(e) = spawn_all(s, &shared, workloads, &mut handles) {
            log::error!(
                target: "schedbench::harness",
                "{}; releasing {} spawned threads",
                e,
                handles.len(),
            );
            abort_spawned(&phase, handles);
            return Err(e);
        }

        let total = handles.len();
        while phase.ready() < total {
            thread::yield_now();
        }

        let epoch = phase.start();
        let stopped_at = hold(config, &phase, epoch, frequency_hz, &samplers_done);
        phase.stop();
        debug_assert_eq!(phase.state(), PhaseState::Stopped);

        let workers = join_role(ThreadRole::Worker, handles.workers);
        let background = join_role(ThreadRole::Background, handles.background);
        let samplers = join_role(ThreadRole::Sampler, handles.samplers);

        let run = BenchmarkRun {
            workload: config.workload,
            duration: config.duration,
            elapsed_cycles: stopped_at.since(epoch.cycles),
            counter_frequency_hz: frequency_hz,
            workers: slot_results(&worker_cells, workers)?,
            background: slot_results(&background_cells, background)?,
            samplers: samplers.into_iter().collect::<Result<Vec<_>, _>>()?,
        };

        log::info!(
            target: "schedbench::harness",
            "done: {:.3}s, {} ops, {} partial slots, {} incomplete samplers",
            run.elapsed_seconds(),
            run.total_ops(),
            run.partial_slots().count(),
            run.samplers.iter().filter(|s| !s.is_complete()).count(),
        );
        Ok(run)
    })
}
