//! Notification objects: a 32-bit pending-bits word plus a wait list.
//!
//! Signal ORs bits in and broadcasts: every waiter present at signal time
//! is woken with the same combined word, and the pending bits are cleared
//! in the same critical section — bits signaled after the exchange belong
//! to the next cycle. Wait consumes pending bits immediately if any are
//! set, otherwise blocks. This is the delivery idiom the IRQ bridge uses.

use crate::sched::{self, Thread, WaitChannel};
use crate::sync::IrqMutex;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

pub struct Notification {
    inner: IrqMutex<Inner>,
}

struct Inner {
    pending: u32,
    waiters: VecDeque<Arc<Thread>>,
}

impl Notification {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: IrqMutex::new(Inner { pending: 0, waiters: VecDeque::new() }) })
    }

    fn chan(self: &Arc<Self>) -> WaitChannel {
        WaitChannel::of(self.as_ref())
    }

    /// OR `bits` into the pending word and wake every waiter with the
    /// combined value. Signaling zero bits is a no-op.
    pub fn signal(self: &Arc<Self>, bits: u32) {
        if bits == 0 {
            return;
        }

        let woken = {
            let mut inner = self.inner.lock();
            inner.pending |= bits;

            if inner.waiters.is_empty() {
                return;
            }

            // Broadcast-atomic: capture the combined bits, clear pending,
            // lift the whole wait list in one critical section.
            let delivery = inner.pending;
            inner.pending = 0;
            let waiters: VecDeque<_> = core::mem::take(&mut inner.waiters);
            (delivery, waiters)
        };

        let (delivery, waiters) = woken;
        for waiter in waiters {
            waiter.notified_bits.store(delivery, Ordering::SeqCst);
            sched::wakeup_thread(&waiter);
        }
    }

    /// Consume pending bits without blocking; `None` if there are none.
    pub fn poll(self: &Arc<Self>, _current: &Arc<Thread>) -> Option<u32> {
        let mut inner = self.inner.lock();
        if inner.pending != 0 {
            let bits = inner.pending;
            inner.pending = 0;
            Some(bits)
        } else {
            None
        }
    }

    /// Park `current` on the wait list. The caller blocks afterwards and
    /// reads its `notified_bits` on resume.
    pub fn enqueue_waiter(self: &Arc<Self>, current: &Arc<Thread>) {
        self.inner.lock().waiters.push_back(current.clone());
    }

    /// Blocking wait: return pending bits immediately if any, otherwise
    /// block until a signal delivers bits.
    pub fn wait(self: &Arc<Self>, current: &Arc<Thread>) -> u32 {
        if let Some(bits) = self.poll(current) {
            return bits;
        }
        self.enqueue_waiter(current);
        sched::block(self.chan());
        current.notified_bits.swap(0, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    #[cfg(test)]
    pub fn pending(&self) -> u32 {
        self.inner.lock().pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop(_arg: usize) {}

    fn fresh() -> (Arc<Thread>, Arc<Thread>) {
        crate::arch::reset_for_test();
        sched::reset_for_test();
        let t1 = sched::thread_create("t1", noop, 0).unwrap();
        let t2 = sched::thread_create("t2", noop, 0).unwrap();
        (t1, t2)
    }

    #[test]
    fn wait_consumes_pending_without_blocking() {
        let _g = crate::test_util::guard();
        let (t1, _) = fresh();
        let n = Notification::new();

        n.signal(0b1010);
        assert_eq!(n.pending(), 0b1010);
        assert_eq!(n.wait(&t1), 0b1010);
        assert_eq!(n.pending(), 0);
    }

    #[test]
    fn signal_broadcasts_combined_bits_to_all_waiters() {
        let _g = crate::test_util::guard();
        let (t1, t2) = fresh();
        let n = Notification::new();

        n.enqueue_waiter(&t1);
        n.enqueue_waiter(&t2);
        assert_eq!(n.waiter_count(), 2);

        // Two separate signals before anyone runs: waiters see the OR.
        n.signal(0b0001);
        // First signal already drained the wait list and delivered.
        assert_eq!(t1.notified_bits.load(Ordering::SeqCst), 0b0001);
        assert_eq!(t2.notified_bits.load(Ordering::SeqCst), 0b0001);
        assert_eq!(n.waiter_count(), 0);

        // Later bits belong to the next cycle.
        n.signal(0b0100);
        assert_eq!(n.pending(), 0b0100);
        assert_eq!(t1.notified_bits.load(Ordering::SeqCst), 0b0001);
    }

    #[test]
    fn pending_accumulates_while_no_waiters() {
        let _g = crate::test_util::guard();
        let (t1, _) = fresh();
        let n = Notification::new();

        n.signal(0b0001);
        n.signal(0b0100);
        assert_eq!(n.wait(&t1), 0b0101);
    }

    #[test]
    fn zero_signal_is_ignored() {
        let _g = crate::test_util::guard();
        let (t1, _) = fresh();
        let n = Notification::new();
        n.enqueue_waiter(&t1);
        n.signal(0);
        assert_eq!(n.waiter_count(), 1);
        assert_eq!(n.pending(), 0);
    }
}
