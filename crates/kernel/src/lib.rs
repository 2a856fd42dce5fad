//! Xnix microkernel core.
//!
//! The kernel is built as an architecture-independent library. The x86
//! backend (context switch, ring transition, paging registers, interrupt
//! glue) is only compiled for bare-metal 32-bit targets; every other target
//! gets a hosted backend with simulated physical memory and a manually
//! advanced clock, which is what the test suite runs against.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod cap;
pub mod config;
pub mod error;
pub mod ipc;
pub mod klog;
pub mod mm;
pub mod perm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod time;

pub use error::KernelError;

/// Result type used throughout the kernel core.
pub type Result<T> = core::result::Result<T, KernelError>;

/// Bring the core up in dependency order. The x86 boot stub calls this
/// with the probed memory range and the loader command line once the CPU
/// is in protected mode with the boot GDT loaded.
pub fn bring_up(
    mem_start: mm::PhysAddr,
    mem_end: mm::PhysAddr,
    cmdline: &str,
    cpus: usize,
) -> Result<()> {
    boot::cmdline::set(cmdline);

    if boot::cmdline::has_kv("xnix.mmu", "off") {
        // The early console path honors this before we get here; the core
        // itself cannot run without paging.
        crate::warn!("xnix.mmu=off: ignored, the kernel core requires paging");
    }

    mm::init(mem_start, mem_end)?;
    process::init();

    let cpus = if boot::cmdline::has_kv("xnix.smp", "off") { 1 } else { cpus };
    sched::init(cpus);

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    arch::x86::interrupts::init();

    crate::info!("xnix core up: {} MiB managed, {} cpu(s)",
        (mem_end.as_u32() - mem_start.as_u32()) / (1024 * 1024), cpus);
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_util {
    //! Tests that touch kernel-global state (simulated RAM, the scheduler,
    //! the kmsg ring) serialize on this lock and re-initialize what they
    //! need; the harness runs tests concurrently otherwise.

    use std::sync::{Mutex, MutexGuard};

    static LOCK: Mutex<()> = Mutex::new(());

    pub fn guard() -> MutexGuard<'static, ()> {
        LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(target_os = "none")]
mod rt {
    use core::panic::PanicInfo;

    #[global_allocator]
    static ALLOCATOR: linked_list_allocator::LockedHeap =
        linked_list_allocator::LockedHeap::empty();

    /// Hand the kernel heap region to the allocator. Called once from the
    /// boot path after the frame allocator is up.
    ///
    /// # Safety
    /// The region must be unused, mapped, and never handed out twice.
    pub unsafe fn heap_init(start: *mut u8, size: usize) {
        ALLOCATOR.lock().init(start, size);
    }

    #[alloc_error_handler]
    fn alloc_error(layout: core::alloc::Layout) -> ! {
        panic!("kernel heap exhausted: {:?}", layout);
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        crate::arch::emergency_write("\n*** KERNEL PANIC ***\n");
        if let Some(loc) = info.location() {
            crate::error!("panic at {}:{}: {}", loc.file(), loc.line(), info.message());
        } else {
            crate::error!("panic: {}", info.message());
        }
        loop {
            crate::arch::halt();
        }
    }
}

#[cfg(target_os = "none")]
pub use rt::heap_init;
