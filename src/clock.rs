//! Hardware cycle counter access.
//!
//! `now()` reads the cheapest monotonic counter the CPU offers: the TSC on
//! x86_64, the virtual counter on aarch64, and `CLOCK_MONOTONIC` nanoseconds
//! everywhere else. The counter is not calibrated on its own; callers convert
//! deltas with [`counter_frequency`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A raw reading of the cycle counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleCount(pub u64);

impl CycleCount {
    /// Cycles elapsed since `earlier`. Panics if the counter went backwards.
    pub fn since(self, earlier: CycleCount) -> u64 {
        assert!(
            self >= earlier,
            "cycle counter went backwards: {} < {}",
            self.0,
            earlier.0
        );
        self.0 - earlier.0
    }
}

/// Window used to calibrate counters whose frequency the CPU does not report.
const CALIBRATION_WINDOW: Duration = Duration::from_millis(20);

// 0 = not probed yet
static FREQUENCY_HZ: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// x86_64 implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86_64")]
mod arch {
    use core::arch::asm;

    /// Reads the TSC. The `lfence` keeps earlier loads from drifting past the read.
    #[inline(always)]
    pub fn read_counter() -> u64 {
        let lo: u32;
        let hi: u32;
        // SAFETY: RDTSC is available on every x86_64 CPU and has no side effects.
        unsafe {
            asm!(
                "lfence",
                "rdtsc",
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack),
            );
        }
        ((hi as u64) << 32) | lo as u64
    }

    /// The TSC rate is not architecturally exposed; calibrate it.
    pub fn reported_frequency() -> Option<u64> {
        None
    }
}

// ---------------------------------------------------------------------------
// aarch64 implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "aarch64")]
mod arch {
    use core::arch::asm;

    #[inline(always)]
    pub fn read_counter() -> u64 {
        let value: u64;
        // SAFETY: CNTVCT_EL0 is readable from EL0 on Linux.
        unsafe {
            asm!(
                "isb",
                "mrs {val}, cntvct_el0",
                val = out(reg) value,
                options(nomem, nostack),
            );
        }
        value
    }

    pub fn reported_frequency() -> Option<u64> {
        let freq: u64;
        // SAFETY: CNTFRQ_EL0 is readable from EL0 on Linux.
        unsafe {
            asm!(
                "mrs {val}, cntfrq_el0",
                val = out(reg) freq,
                options(nomem, nostack),
            );
        }
        (freq > 0).then_some(freq)
    }
}

// ---------------------------------------------------------------------------
// Monotonic clock fallback
// ---------------------------------------------------------------------------

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod arch {
    #[inline(always)]
    pub fn read_counter() -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(ts.tv_nsec as u64)
    }

    pub fn reported_frequency() -> Option<u64> {
        Some(1_000_000_000)
    }
}

/// Reads the cycle counter. Never blocks.
#[inline(always)]
pub fn now() -> CycleCount {
    CycleCount(arch::read_counter())
}

/// Seconds between two readings. `b` must not precede `a` and the frequency
/// must be non-zero; both are programming errors and panic.
pub fn elapsed_seconds(a: CycleCount, b: CycleCount, frequency_hz: u64) -> f64 {
    assert!(frequency_hz > 0, "counter frequency must be positive");
    b.since(a) as f64 / frequency_hz as f64
}

/// Number of counter cycles spanned by `duration`.
pub fn cycles_for(duration: Duration, frequency_hz: u64) -> u64 {
    assert!(frequency_hz > 0, "counter frequency must be positive");
    duration
        .as_nanos()
        .checked_mul(frequency_hz as u128)
        .and_then(|c| u64::try_from(c / 1_000_000_000).ok())
        .unwrap_or(u64::MAX)
}

/// Measures the counter rate against the monotonic clock over `window`.
pub fn calibrate_frequency(window: Duration) -> u64 {
    let wall_start = Instant::now();
    let start = now();
    std::thread::sleep(window);
    let end = now();
    let wall = wall_start.elapsed();

    let cycles = end.since(start) as u128;
    let nanos = wall.as_nanos().max(1);
    let freq = (cycles * 1_000_000_000 / nanos) as u64;
    freq.max(1)
}

/// Counter frequency in Hz. Probed once, then cached.
pub fn counter_frequency() -> u64 {
    let cached = FREQUENCY_HZ.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let freq = match arch::reported_frequency() {
        Some(f) => f,
        None => {
            let f = calibrate_frequency(CALIBRATION_WINDOW);
            log::debug!(
                "calibrated cycle counter: {} Hz over {:?}",
                f,
                CALIBRATION_WINDOW
            );
            f
        }
    };
    FREQUENCY_HZ.store(freq, Ordering::Relaxed);
    freq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic() {
        let mut prev = now();
        for _ in 0..10_000 {
            let cur = now();
            assert!(cur >= prev);
            prev = cur;
        }
    }

    #[test]
    fn test_elapsed_seconds() {
        let a = CycleCount(1_000);
        let b = CycleCount(3_000_001_000);
        let s = elapsed_seconds(a, b, 1_000_000_000);
        assert!((s - 3.0).abs() < 1e-9, "expected 3.0, got {}", s);
        assert_eq!(elapsed_seconds(a, a, 42), 0.0);
    }

    #[test]
    #[should_panic(expected = "counter frequency must be positive")]
    fn test_elapsed_seconds_zero_frequency_panics() {
        elapsed_seconds(CycleCount(0), CycleCount(10), 0);
    }

    #[test]
    #[should_panic(expected = "went backwards")]
    fn test_elapsed_seconds_reversed_panics() {
        elapsed_seconds(CycleCount(10), CycleCount(5), 1);
    }

    #[test]
    fn test_cycles_for() {
        assert_eq!(cycles_for(Duration::from_millis(1), 250_000_000), 250_000);
        assert_eq!(cycles_for(Duration::from_micros(200), 1_000_000_000), 200_000);
        assert_eq!(cycles_for(Duration::ZERO, 1_000), 0);
    }

    #[test]
    fn test_cycles_for_saturates() {
        assert_eq!(cycles_for(Duration::from_secs(20_000_000_000), 3_000_000_000), u64::MAX);
        assert_eq!(cycles_for(Duration::MAX, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_counter_frequency_tracks_wall_time() {
        let freq = counter_frequency();
        assert!(freq > 0);

        let wall_start = Instant::now();
        let start = now();
        std::thread::sleep(Duration::from_millis(50));
        let end = now();
        let wall = wall_start.elapsed().as_secs_f64();

        let measured = elapsed_seconds(start, end, freq);
        // Loose bound: calibration noise and a preempted test thread.
        assert!(
            measured > wall * 0.5 && measured < wall * 2.0,
            "counter says {}s, wall clock says {}s",
            measured,
            wall
        );
    }
}
