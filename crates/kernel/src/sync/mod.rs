//! Kernel synchronization primitives.

mod kmutex;

pub use kmutex::KMutex;

use crate::arch;
use core::ops::{Deref, DerefMut};

/// A spinlock that disables interrupts on the local CPU for as long as it is
/// held, restoring the saved flags on release.
///
/// Every lock shared with an interrupt-driven path (scheduler, endpoints,
/// notifications, handle tables, the frame bitmap, the temp windows) must be
/// of this kind; a plain spinlock taken from both contexts deadlocks the
/// moment the interrupt arrives while the lock is held.
pub struct IrqMutex<T> {
    inner: spin::Mutex<T>,
}

pub struct IrqMutexGuard<'a, T> {
    guard: Option<spin::MutexGuard<'a, T>>,
    flags: u32,
}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: spin::Mutex::new(value) }
    }

    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let flags = arch::irq_save();
        let guard = self.inner.lock();
        IrqMutexGuard { guard: Some(guard), flags }
    }
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().unwrap()
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().unwrap()
    }
}

impl<T> Drop for IrqMutexGuard<'_, T> {
    fn drop(&mut self) {
        // Release the lock before re-enabling interrupts.
        self.guard.take();
        arch::irq_restore(self.flags);
    }
}
