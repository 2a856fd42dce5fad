//! Syscall handlers, grouped by band.

pub mod debug;
pub mod handle;
pub mod io;
pub mod ipc;
pub mod memory;
pub mod process;
pub mod sync_ops;

use crate::sched::Thread;
use crate::{KernelError, Result};
use alloc::sync::Arc;

/// The calling thread; syscalls are meaningless before the scheduler runs.
pub(crate) fn current_thread() -> Result<Arc<Thread>> {
    crate::sched::current().ok_or(KernelError::InvalidArgument)
}

pub(crate) fn current_proc() -> Arc<crate::process::Process> {
    crate::process::current()
}
