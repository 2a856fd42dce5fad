//! Process and thread lifecycle syscalls (band 1-99).

use super::{current_proc, current_thread};
use crate::process;
use crate::sched;
use crate::syscall::uaccess;
use crate::{KernelError, Result};
use xnix_abi::spawn::{slot_str, SpawnArgs, SPAWN_TYPE_PATH};
use xnix_abi::{Pid, Tid};

pub fn sys_exit(args: &[u32; 5]) -> Result<u32> {
    process::exit_current_process(args[0] as i32);
    Ok(0)
}

pub fn sys_spawn(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    if !proc.perm().check_name(crate::perm::nodes::PROC_SPAWN) {
        return Err(KernelError::PermissionDenied);
    }

    let spawn_args: SpawnArgs = unsafe { uaccess::struct_from_user(&proc, args[0])? };
    if spawn_args.spawn_type == SPAWN_TYPE_PATH {
        return Err(KernelError::InvalidArgument); // that is exec's job
    }
    let pid = process::spawn(&proc, &spawn_args, None)?;
    Ok(pid)
}

pub fn sys_exec(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    if !proc.perm().check_name(crate::perm::nodes::PROC_SPAWN) {
        return Err(KernelError::PermissionDenied);
    }

    let spawn_args: SpawnArgs = unsafe { uaccess::struct_from_user(&proc, args[0])? };
    let path = slot_str(&spawn_args.path);
    if path.is_empty() {
        return Err(KernelError::InvalidArgument);
    }

    // ELF bytes come from the filesystem, which lives in userland; the VFS
    // library registers an image loader for this path.
    let image = process::load_image(path).ok_or(KernelError::NotFound)?;
    let pid = process::spawn(&proc, &spawn_args, Some(image.as_slice()))?;
    Ok(pid)
}

pub fn sys_waitpid(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let pid = args[0] as i32;
    let status_ptr = args[1];
    let options = args[2] as i32;

    let (child, code) = process::waitpid(&proc, pid, options)?;
    if status_ptr != 0 && child != 0 {
        uaccess::struct_to_user(&proc, status_ptr, &code)?;
    }
    Ok(child)
}

pub fn sys_getpid(_args: &[u32; 5]) -> Result<u32> {
    Ok(current_proc().pid())
}

pub fn sys_getppid(_args: &[u32; 5]) -> Result<u32> {
    Ok(current_proc().parent().map_or(0, |p| p.pid()))
}

pub fn sys_kill(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    if !proc.perm().check_name(crate::perm::nodes::PROC_KILL) {
        return Err(KernelError::PermissionDenied);
    }
    process::kill(args[0] as Pid, args[1] as i32)?;
    Ok(0)
}

pub fn sys_thread_create(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let entry = args[0];
    let arg = args[1];
    let t = process::create_user_thread(&proc, entry, arg)?;
    Ok(t.tid())
}

pub fn sys_thread_exit(args: &[u32; 5]) -> Result<u32> {
    sched::exit_current(args[0] as i32);
    Ok(0)
}

pub fn sys_thread_join(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let tid = args[0] as Tid;
    let retval_ptr = args[1];

    let target = sched::find_by_tid(tid).ok_or(KernelError::NotFound)?;
    // Only threads of the same process may be joined.
    match target.owner() {
        Some(owner) if owner.pid() == proc.pid() => {}
        _ => return Err(KernelError::PermissionDenied),
    }

    let code = sched::thread_join(&target)?;
    if retval_ptr != 0 {
        uaccess::struct_to_user(&proc, retval_ptr, &code)?;
    }
    Ok(0)
}

pub fn sys_thread_self(_args: &[u32; 5]) -> Result<u32> {
    Ok(current_thread()?.tid())
}

pub fn sys_thread_yield(_args: &[u32; 5]) -> Result<u32> {
    sched::yield_now();
    Ok(0)
}

pub fn sys_thread_detach(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let target = sched::find_by_tid(args[0] as Tid).ok_or(KernelError::NotFound)?;
    match target.owner() {
        Some(owner) if owner.pid() == proc.pid() => {}
        _ => return Err(KernelError::PermissionDenied),
    }
    target.set_detached();
    Ok(0)
}

pub fn sys_sleep(args: &[u32; 5]) -> Result<u32> {
    sched::sleep_ms(args[0]);
    Ok(0)
}
