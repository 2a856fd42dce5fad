//! Architecture backends.
//!
//! The kernel core calls through this module for everything that touches
//! hardware: interrupt flags, CPU identity, paging registers, the context
//! switch, the temp-window mapping slots and the debug console. Bare-metal
//! 32-bit x86 gets the real implementation; every other target gets the
//! hosted simulator, which backs physical memory with an in-process buffer
//! so the memory, scheduling and IPC code can run under `cargo test`.

pub type CpuId = usize;
pub const CPU_NONE: CpuId = usize::MAX;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86 as imp;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub mod hosted;
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use hosted as imp;

pub use imp::{
    context_switch, current_cpu_id, current_pd, debug_write, emergency_write, enter_user_mode,
    halt, invlpg, irq_disable, irq_enable, irq_restore, irq_save, phys_to_virt, prepare_context,
    send_eoi, switch_pd, window_map, window_unmap, Context,
};

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use hosted::{default_memory_range, reset_for_test};
