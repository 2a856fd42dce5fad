//! Thread control blocks.
//!
//! Scheduling state is kept in small atomics written under the scheduler
//! lock; queue membership (runqueue, blocked list, endpoint queues, zombie
//! list) is expressed by which container holds a clone of the `Arc`, never
//! by sibling pointers. A thread is in at most one of those containers at
//! any time.

use crate::arch::{Context, CpuId, CPU_NONE};
use crate::config::{STACK_CANARY, THREAD_STACK_SIZE};
use crate::ipc::IpcSlots;
use crate::process::Process;
use crate::sync::IrqMutex;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use xnix_abi::{Tid, TID_IDLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Exited = 3,
}

impl ThreadState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ThreadState::Ready,
            1 => ThreadState::Running,
            2 => ThreadState::Blocked,
            _ => ThreadState::Exited,
        }
    }
}

/// Opaque key a blocked thread is parked on. Wakeup broadcasts to every
/// thread with a matching key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitChannel(usize);

impl WaitChannel {
    pub const NONE: WaitChannel = WaitChannel(0);

    /// Key derived from an object's address; the object must outlive every
    /// thread blocked on it, which holds because waiters keep the kernel
    /// object alive through their queue membership or handle.
    pub fn of<T: ?Sized>(r: &T) -> Self {
        Self(r as *const T as *const u8 as usize)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// All CPUs allowed.
pub const CPUS_ALL: u32 = u32::MAX;

struct KernelStack {
    mem: Box<[u8]>,
}

impl KernelStack {
    fn new() -> Self {
        let mut mem = alloc::vec![0u8; THREAD_STACK_SIZE].into_boxed_slice();
        mem[..4].copy_from_slice(&STACK_CANARY.to_le_bytes());
        Self { mem }
    }

    fn top(&self) -> usize {
        self.mem.as_ptr() as usize + self.mem.len()
    }

    fn canary_intact(&self) -> bool {
        self.mem[..4] == STACK_CANARY.to_le_bytes()
    }
}

pub struct Thread {
    tid: Tid,
    name: String,

    state: AtomicU8,
    priority: AtomicI32,
    pub(crate) time_slice: AtomicU32,

    /// Affinity bitmap: bit N set means CPU N is allowed.
    cpus_workable: AtomicU32,
    running_on: AtomicUsize,
    migrate_target: AtomicUsize,

    wait_chan: AtomicUsize,
    /// Absolute tick for a timed block; 0 means not sleeping. Cleared by
    /// the tick sweep to signal a timeout to the woken thread.
    wakeup_tick: AtomicU64,
    /// Latch collapsing a wakeup that races the decision to block.
    pub(crate) pending_wakeup: AtomicBool,

    cpu_ticks: AtomicU64,
    exit_code: AtomicI32,

    detached: AtomicBool,
    joined: AtomicBool,

    /// Per-thread IPC slots: in-flight request/reply and the peer TID.
    pub(crate) ipc: IrqMutex<IpcSlots>,
    pub(crate) notified_bits: AtomicU32,

    owner: Option<Arc<Process>>,

    ctx: UnsafeCell<Context>,
    stack: Option<KernelStack>,
}

// `ctx` is only touched during a context switch, under the scheduler's
// IRQ-disabled critical section; everything else is atomics or locked.
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl Thread {
    pub(crate) fn new(
        tid: Tid,
        name: &str,
        entry: extern "C" fn(usize),
        arg: usize,
        owner: Option<Arc<Process>>,
    ) -> Arc<Self> {
        let stack = KernelStack::new();
        let mut ctx = Context::new();
        crate::arch::prepare_context(&mut ctx, stack.top(), entry as usize, arg);

        Arc::new(Self {
            tid,
            name: String::from(name),
            state: AtomicU8::new(ThreadState::Ready as u8),
            priority: AtomicI32::new(0),
            time_slice: AtomicU32::new(0),
            cpus_workable: AtomicU32::new(CPUS_ALL),
            running_on: AtomicUsize::new(CPU_NONE),
            migrate_target: AtomicUsize::new(CPU_NONE),
            wait_chan: AtomicUsize::new(0),
            wakeup_tick: AtomicU64::new(0),
            pending_wakeup: AtomicBool::new(false),
            cpu_ticks: AtomicU64::new(0),
            exit_code: AtomicI32::new(0),
            detached: AtomicBool::new(false),
            joined: AtomicBool::new(false),
            ipc: IrqMutex::new(IpcSlots::new()),
            notified_bits: AtomicU32::new(0),
            owner,
            ctx: UnsafeCell::new(ctx),
            stack: Some(stack),
        })
    }

    /// The per-CPU idle thread: TID 0, lowest priority, pinned to its CPU,
    /// never enqueued on a runqueue.
    pub(crate) fn new_idle(cpu: CpuId, entry: extern "C" fn(usize)) -> Arc<Self> {
        let t = Self::new(TID_IDLE, "idle", entry, 0, None);
        t.priority.store(255, Ordering::Relaxed);
        t.cpus_workable.store(1 << cpu, Ordering::Relaxed);
        t
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_idle(&self) -> bool {
        self.tid == TID_IDLE
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn owner(&self) -> Option<&Arc<Process>> {
        self.owner.as_ref()
    }

    pub fn running_on(&self) -> CpuId {
        self.running_on.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running_on(&self, cpu: CpuId) {
        self.running_on.store(cpu, Ordering::SeqCst);
    }

    pub fn affinity(&self) -> u32 {
        self.cpus_workable.load(Ordering::SeqCst)
    }

    pub fn set_affinity(&self, mask: u32) {
        self.cpus_workable.store(mask, Ordering::SeqCst);
    }

    pub fn allows_cpu(&self, cpu: CpuId) -> bool {
        cpu < 32 && self.affinity() & (1 << cpu) != 0
    }

    pub(crate) fn set_migrate_target(&self, cpu: CpuId) {
        self.migrate_target.store(cpu, Ordering::SeqCst);
    }

    pub(crate) fn take_migrate_target(&self) -> Option<CpuId> {
        let t = self.migrate_target.swap(CPU_NONE, Ordering::SeqCst);
        (t != CPU_NONE).then_some(t)
    }

    pub(crate) fn migrate_pending(&self) -> bool {
        self.migrate_target.load(Ordering::SeqCst) != CPU_NONE
    }

    pub fn wait_chan(&self) -> WaitChannel {
        WaitChannel(self.wait_chan.load(Ordering::SeqCst))
    }

    pub(crate) fn set_wait_chan(&self, chan: WaitChannel) {
        self.wait_chan.store(chan.raw(), Ordering::SeqCst);
    }

    pub(crate) fn wakeup_tick(&self) -> u64 {
        self.wakeup_tick.load(Ordering::SeqCst)
    }

    pub(crate) fn set_wakeup_tick(&self, tick: u64) {
        self.wakeup_tick.store(tick, Ordering::SeqCst);
    }

    pub fn cpu_ticks(&self) -> u64 {
        self.cpu_ticks.load(Ordering::SeqCst)
    }

    pub(crate) fn add_cpu_tick(&self) {
        self.cpu_ticks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn set_detached(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    pub(crate) fn set_joined(&self) {
        self.joined.store(true, Ordering::SeqCst);
    }

    pub(crate) fn ctx_ptr(&self) -> *mut Context {
        self.ctx.get()
    }

    pub fn stack_canary_intact(&self) -> bool {
        self.stack.as_ref().map_or(true, |s| s.canary_intact())
    }

    /// Key this thread's own rendezvous blocking is parked on.
    pub fn self_chan(self: &Arc<Self>) -> WaitChannel {
        WaitChannel::of(self.as_ref())
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
