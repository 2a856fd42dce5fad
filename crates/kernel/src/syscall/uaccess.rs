//! User memory access for syscall arguments.
//!
//! All transfers walk the current process's page tables and copy through
//! the kernel temp windows, page by page; a hole in the user mapping is
//! `BadAddress` (-EFAULT), never a kernel fault.

use crate::process::Process;
use crate::{KernelError, Result};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Largest single user transfer a syscall will perform.
pub const UACCESS_MAX: usize = 64 * 1024;

pub fn copy_from_user(proc: &Arc<Process>, va: u32, len: usize) -> Result<Vec<u8>> {
    if len > UACCESS_MAX {
        return Err(KernelError::MessageTooLarge);
    }
    let mut buf = alloc::vec![0u8; len];
    proc.with_aspace(|space| crate::process::peek_user_bytes(space, va, &mut buf))??;
    Ok(buf)
}

pub fn copy_to_user(proc: &Arc<Process>, va: u32, bytes: &[u8]) -> Result<()> {
    if bytes.len() > UACCESS_MAX {
        return Err(KernelError::MessageTooLarge);
    }
    proc.with_aspace(|space| crate::process::poke_user_bytes(space, va, bytes))?
}

/// Copy a NUL-terminated string of at most `max` bytes from user memory.
pub fn string_from_user(proc: &Arc<Process>, va: u32, max: usize) -> Result<String> {
    let raw = copy_from_user(proc, va, max)?;
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    core::str::from_utf8(&raw[..len])
        .map(String::from)
        .map_err(|_| KernelError::InvalidArgument)
}

/// Read a `#[repr(C)]` POD structure from user memory.
///
/// # Safety
/// `T` must be valid for any bit pattern.
pub unsafe fn struct_from_user<T: Copy>(proc: &Arc<Process>, va: u32) -> Result<T> {
    let raw = copy_from_user(proc, va, core::mem::size_of::<T>())?;
    Ok(core::ptr::read_unaligned(raw.as_ptr() as *const T))
}

/// Write a `#[repr(C)]` POD structure into user memory.
pub fn struct_to_user<T: Copy>(proc: &Arc<Process>, va: u32, value: &T) -> Result<()> {
    let bytes = unsafe {
        core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>())
    };
    copy_to_user(proc, va, bytes)
}

