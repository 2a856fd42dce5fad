//! Handle and capability syscalls (band 200-299).

use super::current_proc;
use crate::cap::HandleTable;
use crate::syscall::uaccess;
use crate::Result;
use xnix_abi::{Handle, Rights, HANDLE_NAME_LEN};

pub fn sys_handle_close(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    proc.handles().free(args[0] as Handle)?;
    Ok(0)
}

/// Duplicate within the calling process: (src, rights-mask, dst-hint).
pub fn sys_handle_duplicate(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let rights = Rights::from_bits(args[1]).ok_or(crate::KernelError::InvalidArgument)?;
    let table = proc.handles();
    HandleTable::duplicate_at(table, args[0] as Handle, table, rights, args[2] as Handle)
}

pub fn sys_handle_find(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let name = uaccess::string_from_user(&proc, args[0], HANDLE_NAME_LEN)?;
    proc.handles()
        .find_by_name(&name)
        .ok_or(crate::KernelError::NotFound)
}

/// Boolean permission probe by node name.
pub fn sys_perm_check(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let name = uaccess::string_from_user(&proc, args[0], 64)?;
    Ok(proc.perm().check_name(&name) as u32)
}
