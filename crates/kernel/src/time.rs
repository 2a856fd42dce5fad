//! Global tick clock.
//!
//! Ticks are advanced by the timer interrupt on bare metal and manually by
//! tests on the hosted backend. One tick is `1000 / SCHED_HZ` milliseconds.

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

pub fn advance(n: u64) {
    TICKS.fetch_add(n, Ordering::SeqCst);
}

pub fn ms_to_ticks(ms: u32) -> u64 {
    crate::config::ms_to_ticks(ms)
}

#[cfg(test)]
pub fn reset_for_test() {
    TICKS.store(0, Ordering::SeqCst);
}
