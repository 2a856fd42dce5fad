//! Debug syscalls (band 700-799).

use super::current_proc;
use crate::syscall::uaccess;
use crate::Result;
use alloc::string::String;

pub fn sys_debug_write(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let len = (args[1] as usize).min(4096);
    let bytes = uaccess::copy_from_user(&proc, args[0], len)?;
    if let Ok(s) = core::str::from_utf8(&bytes) {
        crate::arch::debug_write(s);
    }
    Ok(len as u32)
}

/// ANSI color on the debug console; the real console lives in userland.
pub fn sys_debug_set_color(args: &[u32; 5]) -> Result<u32> {
    let color = (args[0] & 0x7) as u8;
    let mut seq = String::from("\x1b[3");
    seq.push((b'0' + color) as char);
    seq.push('m');
    crate::arch::debug_write(&seq);
    Ok(0)
}

pub fn sys_debug_reset_color(_args: &[u32; 5]) -> Result<u32> {
    crate::arch::debug_write("\x1b[0m");
    Ok(0)
}

/// Drain one kmsg entry: `args = (seq_ptr, buf_ptr, buf_len)`. Returns the
/// number of bytes written, 0 when the cursor is caught up.
pub fn sys_kmsg_read(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let mut seq: u32 = unsafe { uaccess::struct_from_user(&proc, args[0])? };

    let cap = (args[2] as usize).min(crate::config::KMSG_MAX_LINE + 64);
    let mut buf = alloc::vec![0u8; cap];

    match crate::klog::kmsg_read(&mut seq, &mut buf) {
        Some(n) => {
            uaccess::copy_to_user(&proc, args[1], &buf[..n])?;
            uaccess::struct_to_user(&proc, args[0], &seq)?;
            Ok(n as u32)
        }
        None => Ok(0),
    }
}

/// Dump the process table into the caller's buffer.
pub fn sys_proclist(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let mut out = String::new();
    for (pid, name, state) in crate::process::snapshot() {
        out.push_str(&alloc::format!("{} {} {:?}\n", pid, name, state));
    }

    let cap = args[1] as usize;
    let bytes = out.as_bytes();
    let n = bytes.len().min(cap);
    uaccess::copy_to_user(&proc, args[0], &bytes[..n])?;
    Ok(n as u32)
}
