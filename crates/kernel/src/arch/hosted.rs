//! Hosted simulator backend.
//!
//! Physical memory is a fixed in-process buffer, the "CPU" is single and
//! never takes interrupts, and the context switch is a bookkeeping no-op:
//! `schedule()` performs all its queue and state transitions and simply
//! returns to the caller. This is enough to exercise the allocator, the
//! page-table walkers, the scheduler state machine and the IPC rendezvous
//! logic deterministically from unit tests.

use crate::mm::addr::PhysAddr;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use spin::Mutex;

/// Base physical address of the simulated RAM window.
pub const SIM_RAM_BASE: u32 = 0x0010_0000;
/// Simulated RAM size.
pub const SIM_RAM_SIZE: usize = 16 * 1024 * 1024;

// Backed by u64 words so page-table entries in the simulated frames are
// naturally aligned.
struct SimRam(alloc::vec::Vec<u64>);

// One writer at a time is guaranteed by the window lock and by the frame
// allocator's own lock; the raw pointer never outlives the Vec.
unsafe impl Sync for SimRam {}

lazy_static::lazy_static! {
    static ref SIM_RAM: SimRam = SimRam(alloc::vec![0u64; SIM_RAM_SIZE / 8]);
    static ref CONSOLE: Mutex<alloc::string::String> = Mutex::new(alloc::string::String::new());
}

static SIM_CR3: AtomicU32 = AtomicU32::new(0);
static IRQ_DEPTH: AtomicUsize = AtomicUsize::new(0);
static CONTEXT_SWITCHES: AtomicUsize = AtomicUsize::new(0);

/// Saved callee-saved register set. Nothing is ever restored on the host;
/// the fields exist so thread creation has somewhere to park its entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub sp: usize,
    pub entry: usize,
    pub arg: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self { sp: 0, entry: 0, arg: 0 }
    }
}

pub fn current_cpu_id() -> super::CpuId {
    0
}

pub fn irq_save() -> u32 {
    IRQ_DEPTH.fetch_add(1, Ordering::SeqCst) as u32
}

pub fn irq_restore(_flags: u32) {
    IRQ_DEPTH.fetch_sub(1, Ordering::SeqCst);
}

pub fn irq_enable() {}

pub fn irq_disable() {}

pub fn halt() {
    // Nothing to wait for on the host.
}

pub fn send_eoi(_irq: u8) {}

pub fn debug_write(s: &str) {
    CONSOLE.lock().push_str(s);
}

pub fn emergency_write(s: &str) {
    debug_write(s);
}

/// Drain everything written to the simulated console.
pub fn console_take() -> alloc::string::String {
    core::mem::take(&mut *CONSOLE.lock())
}

/// Translate a physical address inside the simulated RAM window.
///
/// Panics on out-of-window addresses; that is a kernel bug, not an error.
pub fn phys_to_virt(pa: PhysAddr) -> *mut u8 {
    let off = pa.as_u32().checked_sub(SIM_RAM_BASE).expect("phys address below RAM window");
    assert!((off as usize) < SIM_RAM_SIZE, "phys address beyond RAM window");
    unsafe { (SIM_RAM.0.as_ptr() as *mut u8).add(off as usize) }
}

/// Window mapping degenerates to direct access on the host. The caller
/// still holds the window lock, so the single-window discipline is kept.
pub unsafe fn window_map(pa: PhysAddr) -> *mut u8 {
    phys_to_virt(pa)
}

pub unsafe fn window_unmap() {}

pub fn invlpg(_vaddr: u32) {}

pub fn current_pd() -> Option<PhysAddr> {
    match SIM_CR3.load(Ordering::SeqCst) {
        0 => None,
        pa => Some(PhysAddr::new(pa)),
    }
}

pub fn switch_pd(pd: PhysAddr) {
    SIM_CR3.store(pd.as_u32(), Ordering::SeqCst);
}

pub fn prepare_context(ctx: &mut Context, stack_top: usize, entry: usize, arg: usize) {
    ctx.sp = stack_top;
    ctx.entry = entry;
    ctx.arg = arg;
}

/// The hosted switch records the event and returns; the caller resumes as
/// if it had been switched back to immediately.
pub unsafe fn context_switch(_old: *mut Context, _new: *const Context) {
    CONTEXT_SWITCHES.fetch_add(1, Ordering::SeqCst);
}

pub fn context_switch_count() -> usize {
    CONTEXT_SWITCHES.load(Ordering::SeqCst)
}

pub unsafe fn enter_user_mode(_eip: u32, _esp: u32) -> ! {
    panic!("enter_user_mode is not available on the hosted backend");
}

/// Memory range handed to `mm::init` by tests and by the hosted boot path.
pub fn default_memory_range() -> (PhysAddr, PhysAddr) {
    (PhysAddr::new(SIM_RAM_BASE), PhysAddr::new(SIM_RAM_BASE + SIM_RAM_SIZE as u32))
}

/// Zero the simulated RAM and paging registers between tests.
pub fn reset_for_test() {
    let base = phys_to_virt(PhysAddr::new(SIM_RAM_BASE));
    unsafe {
        core::ptr::write_bytes(base, 0, SIM_RAM_SIZE);
    }
    SIM_CR3.store(0, Ordering::SeqCst);
}
