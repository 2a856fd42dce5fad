//! Scheduler core: per-CPU runqueues, dispatch, blocking and wakeup, timed
//! sleep, zombie reaping and migration.
//!
//! One IRQ-saving spinlock protects the runqueues, the blocked list and the
//! zombie lists. When held together with an IPC object lock, the scheduler
//! lock is the innermost (acquire order: endpoint -> scheduler).

mod policy;
mod thread;

pub use policy::{RoundRobin, RunQueue, SchedPolicy};
pub use thread::{Thread, ThreadState, WaitChannel, CPUS_ALL};

use crate::arch::{self, Context, CpuId, CPU_NONE};
use crate::config::MAX_CPUS;
use crate::klog::Facility;
use crate::sync::IrqMutex;
use crate::{KernelError, Result};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use xnix_abi::Tid;

struct SchedState {
    rqs: Vec<RunQueue>,
    blocked: Vec<Arc<Thread>>,
    zombies: Vec<Vec<Arc<Thread>>>,
    idle: Vec<Option<Arc<Thread>>>,
}

impl SchedState {
    fn new() -> Self {
        let mut rqs = Vec::with_capacity(MAX_CPUS);
        let mut zombies = Vec::with_capacity(MAX_CPUS);
        let mut idle = Vec::with_capacity(MAX_CPUS);
        for _ in 0..MAX_CPUS {
            rqs.push(RunQueue::new());
            zombies.push(Vec::new());
            idle.push(None);
        }
        Self { rqs, blocked: Vec::new(), zombies, idle }
    }
}

lazy_static::lazy_static! {
    static ref SCHED: IrqMutex<SchedState> = IrqMutex::new(SchedState::new());
}

static RR: RoundRobin = RoundRobin;
static POLICY: spin::RwLock<&'static dyn SchedPolicy> = spin::RwLock::new(&RR);

static NEXT_TID: AtomicU32 = AtomicU32::new(1);
static ONLINE_CPUS: AtomicUsize = AtomicUsize::new(1);
static IDLE_TICKS: AtomicU64 = AtomicU64::new(0);

struct InInterrupt([AtomicBool; MAX_CPUS]);
static IN_INTERRUPT: InInterrupt = InInterrupt([
    AtomicBool::new(false),
    AtomicBool::new(false),
    AtomicBool::new(false),
    AtomicBool::new(false),
    AtomicBool::new(false),
    AtomicBool::new(false),
    AtomicBool::new(false),
    AtomicBool::new(false),
]);

// Context the very first switch on each CPU saves into; it is never
// restored.
struct BootContexts(UnsafeCell<[Context; MAX_CPUS]>);
unsafe impl Sync for BootContexts {}
static BOOT_CTX: BootContexts = BootContexts(UnsafeCell::new([Context::new(); MAX_CPUS]));

fn alloc_tid() -> Tid {
    NEXT_TID.fetch_add(1, Ordering::SeqCst)
}

extern "C" fn idle_task(_arg: usize) {
    loop {
        arch::halt();
    }
}

/// Bring the scheduler up: one idle thread per CPU, default round-robin
/// policy.
pub fn init(online_cpus: usize) {
    let online = online_cpus.clamp(1, MAX_CPUS);
    ONLINE_CPUS.store(online, Ordering::SeqCst);

    let mut s = SCHED.lock();
    for cpu in 0..online {
        if s.idle[cpu].is_none() {
            s.idle[cpu] = Some(Thread::new_idle(cpu, idle_task));
        }
    }
    drop(s);

    POLICY.read().init();
    crate::klog::log(
        crate::klog::LogLevel::Info,
        Facility::Sched,
        format_args!("scheduler up: {} cpu(s), policy {}", online, POLICY.read().name()),
    );
}

pub fn set_policy(policy: &'static dyn SchedPolicy) {
    policy.init();
    *POLICY.write() = policy;
    crate::klog::log(
        crate::klog::LogLevel::Info,
        Facility::Sched,
        format_args!("sched policy: {}", policy.name()),
    );
}

pub fn online_cpus() -> usize {
    ONLINE_CPUS.load(Ordering::SeqCst)
}

/// Thread currently on this CPU.
pub fn current() -> Option<Arc<Thread>> {
    let cpu = arch::current_cpu_id();
    SCHED.lock().rqs[cpu].current.clone()
}

/// Install the boot flow of control as this CPU's current thread. Used
/// once per CPU during bring-up.
pub fn bootstrap_current(t: Arc<Thread>) {
    let cpu = arch::current_cpu_id();
    let mut s = SCHED.lock();
    t.set_state(ThreadState::Running);
    t.set_running_on(cpu);
    s.rqs[cpu].current = Some(t);
}

/// Create a kernel thread and make it Ready.
pub fn thread_create(name: &str, entry: extern "C" fn(usize), arg: usize) -> Result<Arc<Thread>> {
    thread_create_with_owner(name, entry, arg, None)
}

pub fn thread_create_with_owner(
    name: &str,
    entry: extern "C" fn(usize),
    arg: usize,
    owner: Option<Arc<crate::process::Process>>,
) -> Result<Arc<Thread>> {
    let t = Thread::new(alloc_tid(), name, entry, arg, owner);

    let policy = *POLICY.read();
    let mut s = SCHED.lock();
    let cpu = policy.select_cpu(&t, &s.rqs, online_cpus());
    policy.enqueue(&mut s.rqs[cpu], t.clone());
    drop(s);

    crate::klog::log(
        crate::klog::LogLevel::Info,
        Facility::Sched,
        format_args!("thread {} '{}' created", t.tid(), t.name()),
    );
    Ok(t)
}

// Lock order note: this runs under the scheduler lock and takes the
// process thread-list lock inside it. No path takes those locks in the
// opposite order (process code snapshots its thread list before calling
// back into the scheduler).
fn reap_zombies(s: &mut SchedState, cpu: CpuId) {
    let mut reaped = Vec::new();
    s.zombies[cpu].retain(|z| {
        if z.is_detached() || z.is_joined() {
            reaped.push(z.clone());
            false
        } else {
            true
        }
    });
    for z in reaped {
        if let Some(proc) = z.owner() {
            proc.remove_thread(&z);
        }
    }
}

/// Dispatch: pick the next thread for this CPU and switch to it.
///
/// 1. Reap finished zombies.
/// 2. Ask the policy for a candidate; keep running if there is none and the
///    current thread is still runnable, fall back to idle otherwise.
/// 3. Requeue a preempted (still Running) prev, honoring its migration
///    latch.
/// 4. If entered from an interrupt, EOI before the switch — the switch may
///    never return to the interrupt prologue.
pub fn schedule() {
    let cpu = arch::current_cpu_id();
    let policy = *POLICY.read();

    let prev_ctx: *mut Context;
    let next_ctx: *const Context;
    {
        let mut s = SCHED.lock();
        reap_zombies(&mut s, cpu);

        let prev = s.rqs[cpu].current.clone();

        let next = match policy.pick_next(&mut s.rqs[cpu]) {
            Some(n) => n,
            None => match &prev {
                // Keep running — unless a migration request is latched, in
                // which case we must switch away so the move can happen.
                Some(p) if p.state() == ThreadState::Running && !p.migrate_pending() => return,
                _ => {
                    let idle = s.idle[cpu].clone().expect("scheduler not initialized");
                    if prev.as_ref().map_or(false, |p| Arc::ptr_eq(p, &idle)) {
                        return;
                    }
                    idle
                }
            },
        };

        if let Some(p) = &prev {
            if Arc::ptr_eq(p, &next) {
                return;
            }
            if p.state() == ThreadState::Running {
                p.set_state(ThreadState::Ready);
                if !p.is_idle() {
                    let dest = match p.take_migrate_target() {
                        Some(target) if p.allows_cpu(target) => target,
                        _ => cpu,
                    };
                    policy.enqueue(&mut s.rqs[dest], p.clone());
                }
            }
            p.set_running_on(CPU_NONE);
        }

        next.set_state(ThreadState::Running);
        next.set_running_on(cpu);
        s.rqs[cpu].current = Some(next.clone());

        prev_ctx = match &prev {
            Some(p) => p.ctx_ptr(),
            None => unsafe { (BOOT_CTX.0.get() as *mut Context).add(cpu) },
        };
        next_ctx = next.ctx_ptr();
    }

    if IN_INTERRUPT.0[cpu].load(Ordering::SeqCst) {
        arch::send_eoi(0);
    }

    unsafe {
        arch::context_switch(prev_ctx, next_ctx);
    }
}

pub fn yield_now() {
    schedule();
}

fn block_inner(chan: WaitChannel, deadline: Option<u64>) -> bool {
    let current = match current() {
        Some(c) => c,
        None => return true,
    };

    let policy = *POLICY.read();
    {
        let mut s = SCHED.lock();

        // A wakeup raced our decision to block; consume it and stay
        // runnable.
        if current.pending_wakeup.swap(false, Ordering::SeqCst) {
            return true;
        }

        current.set_state(ThreadState::Blocked);
        current.set_wait_chan(chan);
        current.set_wakeup_tick(deadline.unwrap_or(0));

        let cpu = arch::current_cpu_id();
        policy.dequeue(&mut s.rqs[cpu], &current);
        s.blocked.push(current.clone());
    }

    schedule();

    if current.state() == ThreadState::Blocked {
        // Hosted backend: the switch is a no-op and we are still parked;
        // leave the blocked-list state intact for the driver to observe.
        return true;
    }

    // Resumed. Clear the latch so a stale wakeup cannot satisfy the next
    // block.
    current.pending_wakeup.store(false, Ordering::SeqCst);

    if deadline.is_some() && current.wakeup_tick() == 0 {
        return false; // the tick sweep woke us: timeout
    }
    current.set_wakeup_tick(0);
    true
}

/// Park the current thread on `chan` until `wakeup`/`wakeup_thread`.
pub fn block(chan: WaitChannel) {
    block_inner(chan, None);
}

/// Block, reporting whether the caller actually resumed. Retry loops
/// (waitpid, mutex lock, join) must bail out instead of spinning when the
/// hosted backend leaves the thread parked.
pub fn block_checked(chan: WaitChannel) -> bool {
    let me = current();
    block(chan);
    me.map_or(true, |t| t.state() != ThreadState::Blocked)
}

/// Park with a timeout. `timeout_ms == 0` waits forever. Returns `true` on
/// a real wakeup, `false` on timeout.
pub fn block_timeout(chan: WaitChannel, timeout_ms: u32) -> bool {
    if timeout_ms == 0 {
        block_inner(chan, None);
        return true;
    }
    let deadline = crate::time::ticks() + crate::time::ms_to_ticks(timeout_ms);
    block_inner(chan, Some(deadline))
}

/// Wake every thread parked on `chan`.
pub fn wakeup(chan: WaitChannel) {
    let policy = *POLICY.read();
    let mut s = SCHED.lock();

    let mut woken = Vec::new();
    s.blocked.retain(|t| {
        if t.wait_chan() == chan {
            woken.push(t.clone());
            false
        } else {
            true
        }
    });

    for t in woken {
        t.set_wait_chan(WaitChannel::NONE);
        let cpu = policy.select_cpu(&t, &s.rqs, online_cpus());
        policy.enqueue(&mut s.rqs[cpu], t);
    }
}

/// Wake one specific thread. If it has not actually blocked yet, the
/// `pending_wakeup` latch makes its next `block` return immediately.
pub fn wakeup_thread(t: &Arc<Thread>) {
    let policy = *POLICY.read();
    let mut s = SCHED.lock();

    let mut removed = false;
    s.blocked.retain(|x| {
        if Arc::ptr_eq(x, t) {
            removed = true;
            false
        } else {
            true
        }
    });

    t.set_wait_chan(WaitChannel::NONE);
    t.pending_wakeup.store(true, Ordering::SeqCst);

    // Only enqueue if it was really blocked; a Ready/Running thread must
    // not be enqueued twice.
    if removed || t.state() == ThreadState::Blocked {
        let cpu = policy.select_cpu(t, &s.rqs, online_cpus());
        policy.enqueue(&mut s.rqs[cpu], t.clone());
    }
}

/// Sleep for at least `ms` milliseconds.
pub fn sleep_ms(ms: u32) {
    if ms == 0 {
        yield_now();
        return;
    }
    if let Some(current) = current() {
        block_timeout(current.self_chan(), ms);
    }
}

fn sleep_check_wakeup(s: &mut SchedState, policy: &'static dyn SchedPolicy) {
    let now = crate::time::ticks();
    let mut due = Vec::new();
    s.blocked.retain(|t| {
        let tick = t.wakeup_tick();
        if tick != 0 && tick <= now {
            due.push(t.clone());
            false
        } else {
            true
        }
    });
    for t in due {
        // Cleared wakeup_tick tells the sleeper this was a timeout.
        t.set_wakeup_tick(0);
        t.set_wait_chan(WaitChannel::NONE);
        let cpu = policy.select_cpu(&t, &s.rqs, online_cpus());
        policy.enqueue(&mut s.rqs[cpu], t);
    }
}

/// Timer tick. Advances the clock, wakes due sleepers, charges the current
/// thread and asks the policy whether to reschedule. Non-reentrant per CPU.
pub fn tick() {
    let cpu = arch::current_cpu_id();
    if IN_INTERRUPT.0[cpu].swap(true, Ordering::SeqCst) {
        return;
    }

    crate::time::advance(1);

    let policy = *POLICY.read();
    let (current, has_ready) = {
        let mut s = SCHED.lock();
        sleep_check_wakeup(&mut s, policy);
        (s.rqs[cpu].current.clone(), !s.rqs[cpu].queue.is_empty())
    };

    match current {
        None => {
            // First dispatch on this CPU.
            if has_ready {
                schedule();
            }
        }
        Some(c) => {
            c.add_cpu_tick();
            let need = if c.is_idle() {
                IDLE_TICKS.fetch_add(1, Ordering::SeqCst);
                has_ready
            } else {
                policy.tick(&c)
            };
            if need {
                schedule();
            }
        }
    }

    IN_INTERRUPT.0[cpu].store(false, Ordering::SeqCst);
}

/// Terminate the calling thread. If it is the last thread of a user
/// process, the process becomes a zombie and waiting parents are woken.
/// The thread lands on this CPU's zombie list and is freed by a later
/// `schedule()`, never from its own stack.
pub fn exit_current(code: i32) {
    arch::irq_disable();

    let current = match current() {
        Some(c) => c,
        None => return,
    };
    if current.is_idle() {
        panic!("idle thread tried to exit");
    }
    if !current.stack_canary_intact() {
        panic!("kernel stack overflow detected on thread {}", current.tid());
    }

    // A caller blocked on our reply must not wait forever.
    crate::ipc::endpoint::abort_pending_reply(&current);

    // Last thread of its process: move the process to zombie state first,
    // while we can still take process locks.
    if let Some(proc) = current.owner() {
        if proc.pid() != 0 && proc.thread_count() <= 1 {
            crate::process::process_exit(proc, code);
        }
    }

    let policy = *POLICY.read();
    {
        let mut s = SCHED.lock();
        let cpu = arch::current_cpu_id();
        current.set_state(ThreadState::Exited);
        current.set_exit_code(code);
        policy.dequeue(&mut s.rqs[cpu], &current);
        s.zombies[cpu].push(current.clone());
    }

    crate::klog::log(
        crate::klog::LogLevel::Info,
        Facility::Sched,
        format_args!("thread {} '{}' exited with code {}", current.tid(), current.name(), code),
    );

    // Joiners park on the thread object.
    wakeup(WaitChannel::of(current.as_ref()));

    schedule();
}

/// Forcibly terminate another thread: off every scheduler queue, marked
/// Exited and detached, onto this CPU's zombie list.
pub fn force_exit(t: &Arc<Thread>) {
    let policy = *POLICY.read();
    let mut s = SCHED.lock();

    if t.state() == ThreadState::Exited {
        return;
    }

    t.set_state(ThreadState::Exited);
    t.set_exit_code(-1);
    t.set_detached();

    for rq in s.rqs.iter_mut() {
        policy.dequeue(rq, t);
    }
    s.blocked.retain(|x| !Arc::ptr_eq(x, t));

    let cpu = arch::current_cpu_id();
    s.zombies[cpu].push(t.clone());
}

/// Wait for `t` to exit and collect its code. Fails on detached or
/// already-joined threads.
pub fn thread_join(t: &Arc<Thread>) -> Result<i32> {
    if t.is_detached() || t.is_joined() {
        return Err(KernelError::InvalidArgument);
    }
    loop {
        if t.state() == ThreadState::Exited {
            t.set_joined();
            return Ok(t.exit_code());
        }
        if !block_checked(WaitChannel::of(t.as_ref())) {
            return Err(KernelError::WouldBlock);
        }
    }
}

/// Queued migration request. A Running thread is latched and moved at its
/// next scheduling point; a Ready thread moves immediately.
pub fn migrate(t: &Arc<Thread>, target: CpuId) -> Result<()> {
    if target >= online_cpus() {
        return Err(KernelError::InvalidArgument);
    }
    if !t.allows_cpu(target) {
        return Err(KernelError::PermissionDenied);
    }

    let policy = *POLICY.read();
    let mut s = SCHED.lock();

    if t.state() == ThreadState::Running {
        t.set_migrate_target(target);
        return Ok(());
    }

    if t.state() == ThreadState::Ready {
        for rq in s.rqs.iter_mut() {
            policy.dequeue(rq, t);
        }
        policy.enqueue(&mut s.rqs[target], t.clone());
    }
    // Blocked threads pick a queue at wakeup via select_cpu.
    Ok(())
}

/// Find a blocked thread by TID; used by the IPC reply path.
pub fn lookup_blocked(tid: Tid) -> Option<Arc<Thread>> {
    SCHED.lock().blocked.iter().find(|t| t.tid() == tid).cloned()
}

/// Find a thread anywhere: runqueues, current slots, blocked, zombies,
/// idle.
pub fn find_by_tid(tid: Tid) -> Option<Arc<Thread>> {
    let s = SCHED.lock();
    for rq in &s.rqs {
        if let Some(c) = &rq.current {
            if c.tid() == tid {
                return Some(c.clone());
            }
        }
        if let Some(t) = rq.queue.iter().find(|t| t.tid() == tid) {
            return Some(t.clone());
        }
    }
    if let Some(t) = s.blocked.iter().find(|t| t.tid() == tid) {
        return Some(t.clone());
    }
    for z in &s.zombies {
        if let Some(t) = z.iter().find(|t| t.tid() == tid) {
            return Some(t.clone());
        }
    }
    for idle in s.idle.iter().flatten() {
        if idle.tid() == tid {
            return Some(idle.clone());
        }
    }
    None
}

pub fn idle_ticks() -> u64 {
    IDLE_TICKS.load(Ordering::SeqCst)
}

/// Number of threads parked on the blocked list; diagnostics only.
pub fn blocked_count() -> usize {
    SCHED.lock().blocked.len()
}

#[cfg(test)]
pub fn rq_contains(cpu: CpuId, t: &Arc<Thread>) -> bool {
    SCHED.lock().rqs[cpu].queue.iter().any(|x| Arc::ptr_eq(x, t))
}

#[cfg(test)]
pub fn zombie_count() -> usize {
    SCHED.lock().zombies.iter().map(|z| z.len()).sum()
}

#[cfg(test)]
pub fn reset_for_test() {
    let mut s = SCHED.lock();
    *s = SchedState::new();
    drop(s);
    *POLICY.write() = &RR;
    IDLE_TICKS.store(0, Ordering::SeqCst);
    crate::time::reset_for_test();
    init(1);
}

#[cfg(test)]
mod tests;
