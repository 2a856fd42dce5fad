//! Kernel-internal error kinds.
//!
//! These are mapped to negative errno values at the syscall boundary; inside
//! the kernel they stay structured so callers can match on them.

use xnix_abi::Errno;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    OutOfMemory,
    InvalidArgument,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    WouldBlock,
    TimedOut,
    BadHandle,
    BadAddress,
    NoChild,
    MessageTooLarge,
    NotSupported,
    TooManyOpen,
}

impl From<KernelError> for Errno {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::OutOfMemory => Errno::ENOMEM,
            KernelError::InvalidArgument => Errno::EINVAL,
            KernelError::PermissionDenied => Errno::EACCES,
            KernelError::NotFound => Errno::ESRCH,
            KernelError::AlreadyExists => Errno::EEXIST,
            KernelError::WouldBlock => Errno::EAGAIN,
            KernelError::TimedOut => Errno::ETIMEDOUT,
            KernelError::BadHandle => Errno::EBADF,
            KernelError::BadAddress => Errno::EFAULT,
            KernelError::NoChild => Errno::ECHILD,
            KernelError::MessageTooLarge => Errno::E2BIG,
            KernelError::NotSupported => Errno::ENOSYS,
            KernelError::TooManyOpen => Errno::EMFILE,
        }
    }
}

impl KernelError {
    /// Negated errno value as returned through the syscall ABI.
    pub fn as_neg_i32(self) -> i32 {
        Errno::from(self).as_neg_i32()
    }
}
