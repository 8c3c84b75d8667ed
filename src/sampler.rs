//! Periodic wake-up jitter measurement.
//!
//! A sampler sleeps until a series of absolute deadlines `epoch + k * period`
//! with a timed condition-variable wait, and records how many counter cycles
//! late (or early) it actually woke. Deadlines never depend on the previous
//! wake, so lateness does not accumulate.
//!
//! Each sampler holds its own mutex for its whole life. Nobody else ever
//! touches that mutex, so the only thing between a deadline and the wake-up is
//! the scheduler.
//!
//! A wait that has begun always completes and is recorded, even if the stop
//! signal fires meanwhile; the stop signal is only checked between samples.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::{self, CycleCount};
use crate::phase::PhaseController;

/// Period and sample cap of one sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSpec {
    pub period: Duration,
    pub cap: usize,
}

/// Wake-up lateness of one sampler, in counter cycles, one entry per period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterSeries {
    pub period: Duration,
    pub cap: usize,
    pub samples: Vec<i64>,
}

impl JitterSeries {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() == self.cap
    }
}

fn signed_delta(actual: CycleCount, target: u64) -> i64 {
    let diff = actual.0 as i128 - target as i128;
    diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Blocks on `wake` until `deadline`, absorbing early and spurious returns.
fn wait_until<'a>(
    wake: &Condvar,
    mut guard: std::sync::MutexGuard<'a, ()>,
    deadline: Instant,
) -> std::sync::MutexGuard<'a, ()> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return guard;
        }
        guard = wake
            .wait_timeout(guard, remaining)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

/// Sampler thread body. `done` is bumped once the series is complete or the
/// sampler gave up because of the stop signal.
pub fn run_sampler(
    index: usize,
    spec: SamplerSpec,
    frequency_hz: u64,
    phase: &PhaseController,
    done: &AtomicUsize,
) -> JitterSeries {
    let lock = Mutex::new(());
    let wake = Condvar::new();
    let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    let mut samples = Vec::with_capacity(spec.cap);

    let epoch = phase.wait_for_start();

    for k in 1..=spec.cap {
        if phase.is_stopped() {
            break;
        }
        let offset = spec.period.saturating_mul(k as u32);
        let Some(deadline) = epoch.instant.checked_add(offset) else {
            log::warn!(
                target: "schedbench::sampler",
                "sampler {}: deadline {:?} past epoch is out of range",
                index,
                offset,
            );
            break;
        };
        let target = epoch
            .cycles
            .0
            .saturating_add(clock::cycles_for(offset, frequency_hz));

        guard = wait_until(&wake, guard, deadline);
        let actual = clock::now();
        samples.push(signed_delta(actual, target));
    }
    drop(guard);

    log::debug!(
        target: "schedbench::sampler",
        "sampler {} ({:?}): {} of {} samples",
        index,
        spec.period,
        samples.len(),
        spec.cap,
    );
    done.fetch_add(1, Ordering::Release);

    JitterSeries {
        period: spec.period,
        cap: spec.cap,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_signed_delta() {
        assert_eq!(signed_delta(CycleCount(150), 100), 50);
        assert_eq!(signed_delta(CycleCount(100), 150), -50);
        assert_eq!(signed_delta(CycleCount(u64::MAX), 0), i64::MAX);
    }

    #[test]
    fn test_wait_until_past_deadline_returns_immediately() {
        let lock = Mutex::new(());
        let wake = Condvar::new();
        let guard = lock.lock().unwrap();
        let start = Instant::now();
        let _guard = wait_until(&wake, guard, start - Duration::from_millis(1));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_wait_until_reaches_deadline() {
        let lock = Mutex::new(());
        let wake = Condvar::new();
        let guard = lock.lock().unwrap();
        let deadline = Instant::now() + Duration::from_millis(5);
        let _guard = wait_until(&wake, guard, deadline);
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn test_fills_series_up_to_cap() {
        let phase = PhaseController::new();
        phase.start();
        let done = AtomicUsize::new(0);
        let spec = SamplerSpec {
            period: Duration::from_micros(500),
            cap: 20,
        };
        let freq = clock::counter_frequency();
        let series = run_sampler(0, spec, freq, &phase, &done);

        assert_eq!(series.len(), 20);
        assert!(series.is_complete());
        assert_eq!(done.load(Ordering::Acquire), 1);

        // Never woken before the deadline, never absurdly late.
        let bound = 10 * clock::cycles_for(Duration::from_millis(100), freq) as i64;
        for &s in &series.samples {
            assert!(s > -(bound / 100), "woke {} cycles early", -s);
            assert!(s < bound, "woke {} cycles late", s);
        }
    }

    #[test]
    fn test_stop_ends_series_early_without_truncating() {
        let phase = Arc::new(PhaseController::new());
        let done = Arc::new(AtomicUsize::new(0));
        let spec = SamplerSpec {
            period: Duration::from_millis(2),
            cap: 10_000,
        };
        let freq = clock::counter_frequency();

        let handle = {
            let phase = Arc::clone(&phase);
            let done = Arc::clone(&done);
            std::thread::spawn(move || run_sampler(0, spec, freq, &phase, &done))
        };

        while phase.ready() < 1 {
            std::thread::yield_now();
        }
        phase.start();
        std::thread::sleep(Duration::from_millis(30));
        phase.stop();

        let series = handle.join().unwrap();
        assert!(!series.is_empty());
        assert!(series.len() < spec.cap);
        assert_eq!(done.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_unreachable_deadline_ends_series() {
        let phase = PhaseController::new();
        phase.start();
        let done = AtomicUsize::new(0);
        let spec = SamplerSpec {
            period: Duration::from_secs(u64::MAX / 2),
            cap: 5,
        };
        let series = run_sampler(0, spec, clock::counter_frequency(), &phase, &done);
        assert!(series.is_empty());
        assert_eq!(done.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_zero_cap_produces_empty_series() {
        let phase = PhaseController::new();
        phase.start();
        let done = AtomicUsize::new(0);
        let spec = SamplerSpec {
            period: Duration::from_millis(1),
            cap: 0,
        };
        let series = run_sampler(0, spec, 1_000, &phase, &done);
        assert!(series.is_empty());
        assert!(series.is_complete());
    }
}
