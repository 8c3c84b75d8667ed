pub mod alloc;
pub mod cpu;
pub mod dup;
pub mod idle;

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{BenchConfig, WorkloadKind};
use crate::error::Error;
use crate::phase::PhaseController;

/// Result of a single unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One operation completed; count it.
    Counted,
    /// The task has no work left and ends before the stop signal.
    Done,
}

/// A worker body. `step` is called in a tight loop between start and stop;
/// an `Err` is fatal to this worker only.
pub trait Workload: Send {
    fn step(&mut self) -> Result<Step, Error>;
}

impl<W: Workload + ?Sized> Workload for Box<W> {
    fn step(&mut self) -> Result<Step, Error> {
        (**self).step()
    }
}

/// How a worker slot ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Ran until the stop signal.
    Stopped,
    /// Finished its fixed amount of work early.
    Finished,
    /// Gave up after a resource failure; the counter is a partial result.
    Exhausted(String),
}

impl WorkerOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self, WorkerOutcome::Exhausted(_))
    }
}

impl fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerOutcome::Stopped => write!(f, "stopped"),
            WorkerOutcome::Finished => write!(f, "finished"),
            WorkerOutcome::Exhausted(reason) => write!(f, "exhausted ({})", reason),
        }
    }
}

/// One slot of the results table, padded to a cache line so neighbouring
/// workers do not false-share.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CounterCell {
    value: AtomicU64,
}

impl CounterCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the owning worker calls this.
    #[inline(always)]
    fn publish(&self, count: u64) {
        self.value.store(count, Ordering::Relaxed);
    }

    /// Meaningful once the owning thread has been joined.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Shared polling discipline: wait for the release, then step until the stop
/// signal, the task runs out of work, or a step fails.
pub fn drive<W: Workload + ?Sized>(
    slot: usize,
    phase: &PhaseController,
    cell: &CounterCell,
    workload: &mut W,
) -> WorkerOutcome {
    phase.wait_for_start();

    let mut count: u64 = cell.get();
    while !phase.is_stopped() {
        match workload.step() {
            Ok(Step::Counted) => {
                count += 1;
                cell.publish(count);
            }
            Ok(Step::Done) => {
                log::debug!(target: "schedbench::worker", "slot {} finished after {} ops", slot, count);
                return WorkerOutcome::Finished;
            }
            Err(e) => {
                log::error!(target: "schedbench::worker", "slot {}: {}", slot, e);
                return WorkerOutcome::Exhausted(e.to_string());
            }
        }
    }
    WorkerOutcome::Stopped
}

/// Resources shared by every worker of one run.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadContext {
    pub kind: WorkloadKind,
    pub alloc_rounds: u32,
    pub dup_fd: Option<RawFd>,
}

impl WorkloadContext {
    pub fn new(config: &BenchConfig, dup_fd: Option<RawFd>) -> Self {
        Self {
            kind: config.workload,
            alloc_rounds: config.alloc_rounds,
            dup_fd,
        }
    }
}

/// Builds the worker body for `slot`.
pub fn build(slot: usize, ctx: &WorkloadContext) -> Result<Box<dyn Workload>, Error> {
    let workload: Box<dyn Workload> = match ctx.kind {
        WorkloadKind::Cpu => Box::new(cpu::CpuLoop::new(slot)),
        WorkloadKind::Idle => Box::new(idle::IdleCounter),
        WorkloadKind::Alloc => Box::new(alloc::AllocChurn::new(ctx.alloc_rounds)),
        WorkloadKind::Dup => {
            let fd = ctx.dup_fd.ok_or_else(|| {
                Error::InvalidConfig("dup workload needs a shared descriptor".into())
            })?;
            Box::new(dup::DupChurn::new(fd))
        }
    };
    Ok(workload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Succeeds `limit` times, then fails.
    struct FailAfter {
        remaining: u64,
    }

    impl Workload for FailAfter {
        fn step(&mut self) -> Result<Step, Error> {
            if self.remaining == 0 {
                return Err(Error::Exhausted("simulated".into()));
            }
            self.remaining -= 1;
            Ok(Step::Counted)
        }
    }

    struct DoneAfter {
        remaining: u64,
    }

    impl Workload for DoneAfter {
        fn step(&mut self) -> Result<Step, Error> {
            if self.remaining == 0 {
                return Ok(Step::Done);
            }
            self.remaining -= 1;
            Ok(Step::Counted)
        }
    }

    #[test]
    fn test_counter_cell_is_cache_aligned() {
        assert_eq!(std::mem::align_of::<CounterCell>(), 64);
        assert_eq!(std::mem::size_of::<CounterCell>(), 64);
    }

    #[test]
    fn test_drive_exhaustion_keeps_last_count() {
        let phase = PhaseController::new();
        phase.start();
        let cell = CounterCell::new();
        let outcome = drive(0, &phase, &cell, &mut FailAfter { remaining: 37 });
        assert!(outcome.is_partial());
        assert_eq!(cell.get(), 37);
    }

    #[test]
    fn test_drive_finished_early() {
        let phase = PhaseController::new();
        phase.start();
        let cell = CounterCell::new();
        let outcome = drive(0, &phase, &cell, &mut DoneAfter { remaining: 5 });
        assert_eq!(outcome, WorkerOutcome::Finished);
        assert_eq!(cell.get(), 5);
    }

    #[test]
    fn test_drive_does_not_count_after_stop() {
        let phase = Arc::new(PhaseController::new());
        let cell = Arc::new(CounterCell::new());

        let handle = {
            let phase = Arc::clone(&phase);
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || drive(0, &phase, &cell, &mut idle::IdleCounter))
        };

        while phase.ready() < 1 {
            std::thread::yield_now();
        }
        assert_eq!(cell.get(), 0);
        phase.start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        phase.stop();
        let outcome = handle.join().unwrap();
        assert_eq!(outcome, WorkerOutcome::Stopped);

        let frozen = cell.get();
        assert!(frozen > 0);
        phase.stop();
        assert_eq!(cell.get(), frozen);
    }

    #[test]
    fn test_build_dup_without_descriptor_fails() {
        let ctx = WorkloadContext {
            kind: WorkloadKind::Dup,
            alloc_rounds: 1,
            dup_fd: None,
        };
        assert!(matches!(build(0, &ctx), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(WorkerOutcome::Stopped.to_string(), "stopped");
        assert_eq!(
            WorkerOutcome::Exhausted("malloc".into()).to_string(),
            "exhausted (malloc)"
        );
    }
}
