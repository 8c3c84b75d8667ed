use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::Instant;

use crate::clock::{self, CycleCount};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    NotStarted,
    Running,
    Stopped,
}

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// The moment the run was released, on both the wall clock and the counter.
#[derive(Debug, Clone, Copy)]
pub struct Epoch {
    pub instant: Instant,
    pub cycles: CycleCount,
}

impl Epoch {
    fn capture() -> Self {
        Self {
            instant: Instant::now(),
            cycles: clock::now(),
        }
    }
}

/// Start/stop gate shared by every benchmark thread.
///
/// The orchestrator is the only writer. Workers spin on the predicates instead
/// of blocking so that waking them does not go through the scheduler.
#[derive(Debug)]
pub struct PhaseController {
    state: AtomicU8,
    ready: AtomicUsize,
    epoch: OnceLock<Epoch>,
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseController {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(NOT_STARTED),
            ready: AtomicUsize::new(0),
            epoch: OnceLock::new(),
        }
    }

    pub fn state(&self) -> PhaseState {
        match self.state.load(Ordering::Acquire) {
            NOT_STARTED => PhaseState::NotStarted,
            RUNNING => PhaseState::Running,
            _ => PhaseState::Stopped,
        }
    }

    /// Releases every waiting thread. Only the first call has an effect.
    pub fn start(&self) -> Epoch {
        let epoch = *self.epoch.get_or_init(Epoch::capture);
        let _ = self.state.compare_exchange(
            NOT_STARTED,
            RUNNING,
            Ordering::Release,
            Ordering::Relaxed,
        );
        epoch
    }

    /// Requests termination. No-op unless the phase is `Running`.
    pub fn stop(&self) {
        let _ = self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::Release, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Relaxed) == RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Relaxed) == STOPPED
    }

    /// Number of threads that have reached the start gate.
    pub fn ready(&self) -> usize {
        self.ready.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.epoch.get().copied()
    }

    /// Marks the caller ready and spins until the run is released.
    pub fn wait_for_start(&self) -> Epoch {
        self.ready.fetch_add(1, Ordering::AcqRel);
        while self.state.load(Ordering::Acquire) == NOT_STARTED {
            thread::yield_now();
        }
        // The epoch is written before the state leaves NOT_STARTED.
        self.epoch().unwrap_or_else(Epoch::capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_state() {
        let phase = PhaseController::new();
        assert_eq!(phase.state(), PhaseState::NotStarted);
        assert!(!phase.is_running());
        assert!(!phase.is_stopped());
        assert!(phase.epoch().is_none());
    }

    #[test]
    fn test_transitions_in_order() {
        let phase = PhaseController::new();
        phase.start();
        assert_eq!(phase.state(), PhaseState::Running);
        assert!(phase.is_running());
        phase.stop();
        assert_eq!(phase.state(), PhaseState::Stopped);
        assert!(phase.is_stopped());
        assert!(!phase.is_running());
    }

    #[test]
    fn test_stop_before_start_is_ignored() {
        let phase = PhaseController::new();
        phase.stop();
        assert_eq!(phase.state(), PhaseState::NotStarted);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let phase = PhaseController::new();
        phase.start();
        phase.stop();
        phase.stop();
        assert_eq!(phase.state(), PhaseState::Stopped);
    }

    #[test]
    fn test_start_after_stop_does_not_restart() {
        let phase = PhaseController::new();
        let first = phase.start();
        phase.stop();
        let second = phase.start();
        assert_eq!(phase.state(), PhaseState::Stopped);
        assert_eq!(first.cycles, second.cycles);
    }

    #[test]
    fn test_wait_for_start_releases_all_waiters() {
        let phase = Arc::new(PhaseController::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let phase = Arc::clone(&phase);
                std::thread::spawn(move || {
                    let epoch = phase.wait_for_start();
                    // No thread may see Stopped before Running.
                    assert_ne!(phase.state(), PhaseState::NotStarted);
                    epoch.cycles
                })
            })
            .collect();

        while phase.ready() < 4 {
            std::thread::yield_now();
        }
        let epoch = phase.start();

        for h in handles {
            assert_eq!(h.join().unwrap(), epoch.cycles);
        }
    }
}
