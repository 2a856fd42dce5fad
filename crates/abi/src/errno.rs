//! User-visible error numbers.
//!
//! Syscalls return negative values whose magnitudes are these codes;
//! non-negative return values are success.

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    EPERM = 1,       // Operation not permitted
    ENOENT = 2,      // No such file or directory
    ESRCH = 3,       // No such process
    EINTR = 4,       // Interrupted system call
    EIO = 5,         // I/O error
    E2BIG = 7,       // Argument list too long
    ENOEXEC = 8,     // Exec format error
    EBADF = 9,       // Bad handle
    ECHILD = 10,     // No child processes
    EAGAIN = 11,     // Try again / would block
    ENOMEM = 12,     // Out of memory
    EACCES = 13,     // Permission denied
    EFAULT = 14,     // Bad address
    EBUSY = 16,      // Resource busy
    EEXIST = 17,     // Already exists
    EINVAL = 22,     // Invalid argument
    EMFILE = 24,     // Too many open handles
    ENOSPC = 28,     // No space left
    ENAMETOOLONG = 36, // Name too long
    ENOSYS = 38,     // Syscall not implemented
    EMSGSIZE = 90,   // Message too long
    ENOTSUP = 95,    // Operation not supported
    ETIMEDOUT = 110, // Timed out
}

impl Errno {
    /// Negated value as returned through the syscall ABI.
    pub fn as_isize(self) -> isize {
        -(self as i32 as isize)
    }

    pub fn as_neg_i32(self) -> i32 {
        -(self as i32)
    }

    /// Get a static string description of the error
    pub fn description(self) -> &'static str {
        match self {
            Errno::EPERM => "Operation not permitted",
            Errno::ENOENT => "No such file or directory",
            Errno::ESRCH => "No such process",
            Errno::EINTR => "Interrupted system call",
            Errno::EIO => "I/O error",
            Errno::E2BIG => "Argument list too long",
            Errno::ENOEXEC => "Exec format error",
            Errno::EBADF => "Bad handle",
            Errno::ECHILD => "No child processes",
            Errno::EAGAIN => "Try again",
            Errno::ENOMEM => "Out of memory",
            Errno::EACCES => "Permission denied",
            Errno::EFAULT => "Bad address",
            Errno::EBUSY => "Resource busy",
            Errno::EEXIST => "Already exists",
            Errno::EINVAL => "Invalid argument",
            Errno::EMFILE => "Too many open handles",
            Errno::ENOSPC => "No space left",
            Errno::ENAMETOOLONG => "Name too long",
            Errno::ENOSYS => "Syscall not implemented",
            Errno::EMSGSIZE => "Message too long",
            Errno::ENOTSUP => "Operation not supported",
            Errno::ETIMEDOUT => "Timed out",
        }
    }

    /// Convert a negated errno value (e.g. -22) back to an `Errno`.
    pub fn from_negated_i32(value: i32) -> Self {
        match -value {
            1 => Errno::EPERM,
            2 => Errno::ENOENT,
            3 => Errno::ESRCH,
            4 => Errno::EINTR,
            5 => Errno::EIO,
            7 => Errno::E2BIG,
            8 => Errno::ENOEXEC,
            9 => Errno::EBADF,
            10 => Errno::ECHILD,
            11 => Errno::EAGAIN,
            12 => Errno::ENOMEM,
            13 => Errno::EACCES,
            14 => Errno::EFAULT,
            16 => Errno::EBUSY,
            17 => Errno::EEXIST,
            24 => Errno::EMFILE,
            28 => Errno::ENOSPC,
            36 => Errno::ENAMETOOLONG,
            38 => Errno::ENOSYS,
            90 => Errno::EMSGSIZE,
            95 => Errno::ENOTSUP,
            110 => Errno::ETIMEDOUT,
            _ => Errno::EINVAL,
        }
    }
}

pub type Result<T> = core::result::Result<T, Errno>;
