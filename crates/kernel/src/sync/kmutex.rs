//! Kernel mutex objects exposed to userland through handles.
//!
//! Contended lockers block on the mutex's wait channel; unlock wakes them
//! all and they race for the owner slot again.

use crate::sched::{self, Thread, WaitChannel};
use crate::{KernelError, Result};
use alloc::sync::Arc;
use xnix_abi::{Tid, TID_INVALID};

pub struct KMutex {
    owner: super::IrqMutex<Tid>,
}

impl KMutex {
    pub fn new() -> Self {
        Self { owner: super::IrqMutex::new(TID_INVALID) }
    }

    fn chan(&self) -> WaitChannel {
        WaitChannel::of(self)
    }

    pub fn lock(self: &Arc<Self>, current: &Arc<Thread>) -> Result<()> {
        loop {
            {
                let mut owner = self.owner.lock();
                if *owner == TID_INVALID {
                    *owner = current.tid();
                    return Ok(());
                }
                if *owner == current.tid() {
                    // Not recursive.
                    return Err(KernelError::WouldBlock);
                }
            }
            if !sched::block_checked(self.chan()) {
                return Err(KernelError::WouldBlock);
            }
        }
    }

    pub fn unlock(self: &Arc<Self>, current: &Arc<Thread>) -> Result<()> {
        {
            let mut owner = self.owner.lock();
            if *owner != current.tid() {
                return Err(KernelError::PermissionDenied);
            }
            *owner = TID_INVALID;
        }
        sched::wakeup(self.chan());
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        *self.owner.lock() != TID_INVALID
    }
}

impl Default for KMutex {
    fn default() -> Self {
        Self::new()
    }
}
