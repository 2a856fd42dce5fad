//! Compile-time tunables.

/// Scheduler tick rate in Hz (one tick = 10 ms).
pub const SCHED_HZ: u32 = 100;

/// Round-robin time slice in ticks.
pub const SCHED_QUANTUM: u32 = 2;

/// Upper bound on CPUs the scheduler will manage.
pub const MAX_CPUS: usize = 8;

/// Kernel stack size per thread.
pub const THREAD_STACK_SIZE: usize = 16 * 1024;

/// Stack canary planted at the base of every kernel stack.
pub const STACK_CANARY: u32 = 0xDEAD_BEEF;

/// Inline IPC buffer bound; larger payloads must go through shared memory.
pub const IPC_MAX_BUF: usize = xnix_abi::ipc::IPC_MAX_BUF;

/// Initial handle table capacity; tables grow by doubling and never shrink.
pub const HANDLE_TABLE_INIT: usize = 32;

/// Top of the user stack region; two pages are mapped below this address.
pub const USER_STACK_TOP: u32 = 0xBFFF_F000;

/// User stack size in pages.
pub const USER_STACK_PAGES: usize = 2;

/// Base of the user heap grown by `sbrk`.
pub const USER_HEAP_BASE: u32 = 0x4000_0000;

/// Region for additional user thread stacks, below the main stack.
pub const USER_TSTACK_BASE: u32 = 0xBF00_0000;
/// Spacing between user thread stacks (stack + guard gap).
pub const USER_TSTACK_STRIDE: u32 = 0x1_0000;

/// kmsg ring capacity in bytes.
pub const KMSG_BUF_SIZE: usize = 16 * 1024;

/// Longest single kmsg line; longer lines are truncated.
pub const KMSG_MAX_LINE: usize = 256;

/// Number of ISA IRQ lines the notification bridge covers.
pub const NR_IRQS: usize = 16;

/// Convert milliseconds to scheduler ticks, rounding up and never to zero.
pub const fn ms_to_ticks(ms: u32) -> u64 {
    let t = (ms as u64 * SCHED_HZ as u64 + 999) / 1000;
    if t == 0 {
        1
    } else {
        t
    }
}
