//! Scheduling policy boundary.
//!
//! Mechanism and policy are separated: the scheduler core decides *when* to
//! reschedule and performs the switch; the policy decides *which* thread
//! runs and manages the runqueues. The default policy is round-robin.

use super::thread::{Thread, ThreadState};
use crate::arch::CpuId;
use crate::config::SCHED_QUANTUM;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

/// Per-CPU ready queue plus the thread currently on that CPU.
pub struct RunQueue {
    pub queue: VecDeque<Arc<Thread>>,
    pub current: Option<Arc<Thread>>,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self { queue: VecDeque::new(), current: None }
    }

    pub fn nr_running(&self) -> usize {
        self.queue.len() + self.current.as_ref().map_or(0, |c| !c.is_idle() as usize)
    }
}

pub trait SchedPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn init(&self) {}

    /// Thread becomes Ready on `rq`.
    fn enqueue(&self, rq: &mut RunQueue, t: Arc<Thread>);

    /// Remove from its runqueue, if present.
    fn dequeue(&self, rq: &mut RunQueue, t: &Arc<Thread>);

    /// Next thread for the calling CPU.
    fn pick_next(&self, rq: &mut RunQueue) -> Option<Arc<Thread>>;

    /// Timer tick against the running thread; true requests a reschedule.
    fn tick(&self, current: &Arc<Thread>) -> bool;

    /// Initial placement / wakeup load balance.
    fn select_cpu(&self, t: &Arc<Thread>, rqs: &[RunQueue], online: usize) -> CpuId;
}

/// Round-robin: enqueue at the tail, pick from the head, preempt when the
/// quantum runs out.
pub struct RoundRobin;

impl SchedPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "rr"
    }

    fn enqueue(&self, rq: &mut RunQueue, t: Arc<Thread>) {
        t.time_slice.store(SCHED_QUANTUM, Ordering::SeqCst);
        t.set_state(ThreadState::Ready);
        rq.queue.push_back(t);
    }

    fn dequeue(&self, rq: &mut RunQueue, t: &Arc<Thread>) {
        rq.queue.retain(|x| !Arc::ptr_eq(x, t));
    }

    fn pick_next(&self, rq: &mut RunQueue) -> Option<Arc<Thread>> {
        rq.queue.pop_front()
    }

    fn tick(&self, current: &Arc<Thread>) -> bool {
        let left = current.time_slice.load(Ordering::SeqCst);
        if left > 1 {
            current.time_slice.store(left - 1, Ordering::SeqCst);
            false
        } else {
            current.time_slice.store(SCHED_QUANTUM, Ordering::SeqCst);
            true
        }
    }

    fn select_cpu(&self, t: &Arc<Thread>, rqs: &[RunQueue], online: usize) -> CpuId {
        let mut best = 0;
        let mut best_load = usize::MAX;
        for (cpu, rq) in rqs.iter().enumerate().take(online) {
            if !t.allows_cpu(cpu) {
                continue;
            }
            let load = rq.nr_running();
            if load < best_load {
                best_load = load;
                best = cpu;
            }
        }
        best
    }
}
