// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! CPU-bound concurrency gate.
//!
//! Heavyweight computations (configured-target style functions) hold a permit
//! for the CPU-bound portion of an activation. The permit is released around
//! dependency fetches when the owner opts in, so work that is waiting on
//! values never starves runnable work of a core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Waits above this threshold count as contention and are reported.
const SLOW_WAIT: Duration = Duration::from_millis(5);

/// Report accumulated contention every this many slow acquisitions.
const REPORT_EVERY: u64 = 64;

/// Counting semaphore bounding concurrent CPU-heavy activations.
#[derive(Debug)]
pub struct CpuBoundSemaphore {
    permits: Mutex<usize>,
    available: Condvar,
    capacity: usize,
    slow_acquires: AtomicU64,
    slow_wait_micros: AtomicU64,
}

impl CpuBoundSemaphore {
    /// Creates a semaphore with `permits` slots; zero is clamped to one.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        let capacity = permits.max(1);
        Self {
            permits: Mutex::new(capacity),
            available: Condvar::new(),
            capacity,
            slow_acquires: AtomicU64::new(0),
            slow_wait_micros: AtomicU64::new(0),
        }
    }

    /// Configured number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a permit is available and returns an RAII guard.
    #[must_use]
    pub fn acquire(&self) -> CpuPermit<'_> {
        self.acquire_raw();
        CpuPermit { sem: self }
    }

    /// Runs `fetch` with this thread's permit temporarily released.
    ///
    /// Used by the compute environment when
    /// `unblock_cpu_work_when_fetching_deps` is set: the permit the caller
    /// holds is handed back for the duration of the fetch and re-acquired
    /// before returning.
    pub fn unblocked<R>(&self, fetch: impl FnOnce() -> R) -> R {
        self.release_raw();
        let result = fetch();
        self.acquire_raw();
        result
    }

    fn acquire_raw(&self) {
        let start = Instant::now();
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
        drop(permits);

        let waited = start.elapsed();
        if waited >= SLOW_WAIT {
            let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
            self.slow_wait_micros.fetch_add(micros, Ordering::Relaxed);
            let slow = self.slow_acquires.fetch_add(1, Ordering::Relaxed) + 1;
            if slow % REPORT_EVERY == 0 {
                tracing::debug!(
                    target: "anvil::semaphore",
                    slow_acquires = slow,
                    total_slow_wait_micros = self.slow_wait_micros.load(Ordering::Relaxed),
                    capacity = self.capacity,
                    "cpu-bound semaphore contention"
                );
            }
        }
    }

    fn release_raw(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }

    /// Number of slow (>5 ms) acquisitions so far.
    #[must_use]
    pub fn slow_acquires(&self) -> u64 {
        self.slow_acquires.load(Ordering::Relaxed)
    }
}

/// RAII permit returned by [`CpuBoundSemaphore::acquire`].
#[derive(Debug)]
pub struct CpuPermit<'a> {
    sem: &'a CpuBoundSemaphore,
}

impl Drop for CpuPermit<'_> {
    fn drop(&mut self) {
        self.sem.release_raw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn bounds_concurrent_holders() {
        let sem = CpuBoundSemaphore::new(2);
        let peak = AtomicUsize::new(0);
        let live = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let _permit = sem.acquire();
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(2));
                    live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn unblocked_hands_the_slot_to_a_waiter() {
        let sem = CpuBoundSemaphore::new(1);
        let permit = sem.acquire();
        let observed = AtomicUsize::new(0);
        std::thread::scope(|s| {
            s.spawn(|| {
                let _inner = sem.acquire();
                observed.store(1, Ordering::SeqCst);
            });
            // Give the waiter time to block, then yield the slot.
            std::thread::sleep(Duration::from_millis(5));
            sem.unblocked(|| {
                while observed.load(Ordering::SeqCst) == 0 {
                    std::thread::yield_now();
                }
            });
        });
        drop(permit);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_permits_clamps_to_one() {
        let sem = CpuBoundSemaphore::new(0);
        assert_eq!(sem.capacity(), 1);
        let permit = sem.acquire();
        drop(permit);
    }
}
