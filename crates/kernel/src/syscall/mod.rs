//! Syscall dispatch.
//!
//! The software-interrupt entry puts the syscall number in register A and
//! up to five arguments in B, C, D, Si, Di; the return value goes back in
//! A. Negative returns carry the errno magnitude. Numbers are banded per
//! subsystem; the VFS band belongs to the userland VFS dispatch library
//! and is routed through a registered hook.
//!
//! Signal delivery is the explicit last step of every dispatch: a fatal
//! pending signal terminates the process before it re-enters user mode.

mod handlers;
pub mod uaccess;

use crate::{KernelError, Result};
use xnix_abi::sysno::*;
use xnix_abi::Errno;

/// Hook type for the VFS band (300..=399).
pub type VfsHandler = fn(nr: u32, args: &[u32; 5]) -> i32;

static VFS_HANDLER: spin::RwLock<Option<VfsHandler>> = spin::RwLock::new(None);

pub fn register_vfs_handler(handler: VfsHandler) {
    *VFS_HANDLER.write() = Some(handler);
}

pub fn dispatch(nr: u32, args: &[u32; 5]) -> i32 {
    let ret = route(nr, args);

    crate::process::check_signals();

    match ret {
        Ok(v) => v as i32,
        Err(e) => e.as_neg_i32(),
    }
}

fn route(nr: u32, args: &[u32; 5]) -> Result<u32> {
    match nr {
        // Process and thread lifecycle.
        SYS_EXIT => handlers::process::sys_exit(args),
        SYS_SPAWN => handlers::process::sys_spawn(args),
        SYS_EXEC => handlers::process::sys_exec(args),
        SYS_WAITPID => handlers::process::sys_waitpid(args),
        SYS_GETPID => handlers::process::sys_getpid(args),
        SYS_GETPPID => handlers::process::sys_getppid(args),
        SYS_KILL => handlers::process::sys_kill(args),
        SYS_THREAD_CREATE => handlers::process::sys_thread_create(args),
        SYS_THREAD_EXIT => handlers::process::sys_thread_exit(args),
        SYS_THREAD_JOIN => handlers::process::sys_thread_join(args),
        SYS_THREAD_SELF => handlers::process::sys_thread_self(args),
        SYS_THREAD_YIELD => handlers::process::sys_thread_yield(args),
        SYS_THREAD_DETACH => handlers::process::sys_thread_detach(args),
        SYS_SLEEP => handlers::process::sys_sleep(args),

        // IPC.
        SYS_ENDPOINT_CREATE => handlers::ipc::sys_endpoint_create(args),
        SYS_IPC_SEND => handlers::ipc::sys_ipc_send(args),
        SYS_IPC_SEND_ASYNC => handlers::ipc::sys_ipc_send_async(args),
        SYS_IPC_RECV => handlers::ipc::sys_ipc_recv(args),
        SYS_IPC_CALL => handlers::ipc::sys_ipc_call(args),
        SYS_IPC_REPLY => handlers::ipc::sys_ipc_reply(args),
        SYS_IPC_REPLY_TO => handlers::ipc::sys_ipc_reply_to(args),
        SYS_NOTIFICATION_CREATE => handlers::ipc::sys_notification_create(args),
        SYS_NOTIFICATION_WAIT => handlers::ipc::sys_notification_wait(args),
        SYS_NOTIFICATION_SIGNAL => handlers::ipc::sys_notification_signal(args),

        // Handles and capabilities.
        SYS_HANDLE_CLOSE => handlers::handle::sys_handle_close(args),
        SYS_HANDLE_DUPLICATE => handlers::handle::sys_handle_duplicate(args),
        SYS_HANDLE_FIND => handlers::handle::sys_handle_find(args),
        SYS_PERM_CHECK => handlers::handle::sys_perm_check(args),

        // VFS band: external dispatch library.
        BAND_VFS_START..=BAND_VFS_END => match *VFS_HANDLER.read() {
            Some(handler) => {
                let ret = handler(nr, args);
                if ret < 0 {
                    Err(errno_to_kernel(Errno::from_negated_i32(ret)))
                } else {
                    Ok(ret as u32)
                }
            }
            None => Err(KernelError::NotSupported),
        },

        // Memory.
        SYS_SBRK => handlers::memory::sys_sbrk(args),
        SYS_MMAP_PHYS => handlers::memory::sys_mmap_phys(args),
        SYS_PHYSMEM_INFO => handlers::memory::sys_physmem_info(args),

        // I/O.
        SYS_IOPORT_OUTB | SYS_IOPORT_INB | SYS_IOPORT_OUTW | SYS_IOPORT_INW => {
            handlers::io::sys_ioport(nr, args)
        }
        SYS_IRQ_BIND => handlers::io::sys_irq_bind(args),
        SYS_IRQ_UNBIND => handlers::io::sys_irq_unbind(args),
        SYS_IRQ_READ => handlers::io::sys_irq_read(args),

        // Sync.
        SYS_MUTEX_CREATE => handlers::sync_ops::sys_mutex_create(args),
        SYS_MUTEX_DESTROY => handlers::sync_ops::sys_mutex_destroy(args),
        SYS_MUTEX_LOCK => handlers::sync_ops::sys_mutex_lock(args),
        SYS_MUTEX_UNLOCK => handlers::sync_ops::sys_mutex_unlock(args),

        // Debug.
        SYS_DEBUG_WRITE => handlers::debug::sys_debug_write(args),
        SYS_DEBUG_SET_COLOR => handlers::debug::sys_debug_set_color(args),
        SYS_DEBUG_RESET_COLOR => handlers::debug::sys_debug_reset_color(args),
        SYS_KMSG_READ => handlers::debug::sys_kmsg_read(args),
        SYS_PROCLIST => handlers::debug::sys_proclist(args),

        _ => Err(KernelError::NotSupported),
    }
}

fn errno_to_kernel(errno: Errno) -> KernelError {
    match errno {
        Errno::ENOMEM => KernelError::OutOfMemory,
        Errno::EACCES | Errno::EPERM => KernelError::PermissionDenied,
        Errno::EBADF => KernelError::BadHandle,
        Errno::ETIMEDOUT => KernelError::TimedOut,
        Errno::EAGAIN => KernelError::WouldBlock,
        Errno::ESRCH | Errno::ENOENT => KernelError::NotFound,
        Errno::EFAULT => KernelError::BadAddress,
        Errno::ECHILD => KernelError::NoChild,
        Errno::E2BIG | Errno::EMSGSIZE => KernelError::MessageTooLarge,
        Errno::ENOSYS => KernelError::NotSupported,
        _ => KernelError::InvalidArgument,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscalls_are_enosys() {
        let _g = crate::test_util::guard();
        crate::arch::reset_for_test();
        let (start, end) = crate::arch::default_memory_range();
        crate::mm::frame::init(start, end);
        crate::mm::address_space::kernel_init(end).unwrap();
        crate::sched::reset_for_test();
        crate::process::reset_for_test();

        assert_eq!(dispatch(9999, &[0; 5]), Errno::ENOSYS.as_neg_i32());
        // VFS band without a registered dispatcher.
        assert_eq!(dispatch(xnix_abi::sysno::SYS_OPEN, &[0; 5]), Errno::ENOSYS.as_neg_i32());
    }

    #[test]
    fn vfs_band_routes_through_the_hook() {
        let _g = crate::test_util::guard();
        crate::arch::reset_for_test();
        let (start, end) = crate::arch::default_memory_range();
        crate::mm::frame::init(start, end);
        crate::mm::address_space::kernel_init(end).unwrap();
        crate::sched::reset_for_test();
        crate::process::reset_for_test();

        fn fake_vfs(nr: u32, args: &[u32; 5]) -> i32 {
            if nr == xnix_abi::sysno::SYS_OPEN {
                args[0] as i32
            } else {
                Errno::ENOSYS.as_neg_i32()
            }
        }
        register_vfs_handler(fake_vfs);
        assert_eq!(dispatch(xnix_abi::sysno::SYS_OPEN, &[5, 0, 0, 0, 0]), 5);
        assert_eq!(
            dispatch(xnix_abi::sysno::SYS_MKDIR, &[0; 5]),
            Errno::ENOSYS.as_neg_i32()
        );
        *super::VFS_HANDLER.write() = None;
    }

    #[test]
    fn getpid_of_kernel_context_is_zero() {
        let _g = crate::test_util::guard();
        crate::arch::reset_for_test();
        let (start, end) = crate::arch::default_memory_range();
        crate::mm::frame::init(start, end);
        crate::mm::address_space::kernel_init(end).unwrap();
        crate::sched::reset_for_test();
        crate::process::reset_for_test();

        assert_eq!(dispatch(xnix_abi::sysno::SYS_GETPID, &[0; 5]), 0);
    }
}
