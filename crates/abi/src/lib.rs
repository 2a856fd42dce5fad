//! Shared kernel/userland ABI definitions.
//!
//! Everything that crosses the syscall boundary lives here: error numbers,
//! syscall numbers, capability rights, IPC wire-format limits, spawn
//! argument layout and signal numbers. This crate contains no logic beyond
//! simple conversions so that both the kernel and userland programs can
//! depend on it.

#![no_std]

pub mod errno;
pub mod ipc;
pub mod signal;
pub mod spawn;
pub mod sysno;

pub use errno::Errno;

/// A handle names a capability inside a single process.
pub type Handle = u32;

/// Distinct from every valid handle index.
pub const HANDLE_INVALID: Handle = u32::MAX;

/// Maximum length of a handle name, including the implicit NUL-free bound.
pub const HANDLE_NAME_LEN: usize = 32;

pub type Pid = u32;
pub const PID_INVALID: Pid = 0;
/// The init process; its death is a kernel panic.
pub const PID_INIT: Pid = 1;

pub type Tid = u32;
/// TID 0 is shared by the per-CPU idle threads.
pub const TID_IDLE: Tid = 0;
pub const TID_INVALID: Tid = u32::MAX;

/// `waitpid` option: do not block if no child has exited.
pub const WNOHANG: i32 = 1;

/// Kernel object classes nameable through a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HandleType {
    None = 0,
    Endpoint = 1,
    Notification = 2,
    Process = 3,
    Thread = 4,
    Mutex = 5,
    PhysMem = 6,
}

bitflags::bitflags! {
    /// Rights carried by a handle table entry.
    ///
    /// Duplication across processes requires GRANT on the source entry and
    /// the new rights to be a subset of the source rights.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const GRANT  = 1 << 2;
        const MANAGE = 1 << 3;
    }
}

impl Rights {
    /// Default rights for a freshly created object in its creator's table.
    pub const fn full() -> Self {
        Self::READ.union(Self::WRITE).union(Self::GRANT).union(Self::MANAGE)
    }
}
