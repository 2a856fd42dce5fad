//! The effect boundary between the service manager and the system.
//!
//! Everything init does to the outside world goes through this trait:
//! spawning, reaping, endpoint creation, handle lookup, mount probing and
//! logging. The graph logic stays pure and host-testable; the kernel
//! veneer lives behind the bare-metal cfg below.

use alloc::string::String;
use alloc::vec::Vec;
use xnix_abi::Handle;

/// Everything needed to start one service.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub name: String,
    pub profile: Option<String>,
    pub module_name: String,
    pub path: String,
    pub args: Vec<String>,
    /// (child-visible name, handle in init's table) pairs, including the
    /// trailing `init_notify` endpoint when one is configured.
    pub handles: Vec<(String, Handle)>,
    pub use_path: bool,
}

pub trait Sys {
    /// Spawn the service; returns its PID.
    fn spawn(&mut self, req: &StartRequest) -> Result<i32, i32>;

    /// Create a named endpoint in init's handle table.
    fn endpoint_create(&mut self, name: &str) -> Option<Handle>;

    /// Locate a kernel-injected handle by name in init's table.
    fn handle_find(&mut self, name: &str) -> Option<Handle>;

    fn path_exists(&mut self, path: &str) -> bool;

    /// One liveness probe against a filesystem service's endpoint (a
    /// trivial VFS_INFO call with a short timeout).
    fn probe_endpoint(&mut self, ep: Handle) -> bool;

    fn vfs_mount(&mut self, path: &str, ep: Handle) -> Result<(), i32>;

    /// Reap one exited child, if any: `(pid, status)`.
    fn waitpid_nohang(&mut self) -> Option<(i32, i32)>;

    fn log_line(&mut self, line: &str);
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod kernel {
    //! Kernel-backed `Sys`: raw syscall stubs over the software-interrupt
    //! gate. Only built for the real userland binary.

    use super::{StartRequest, Sys};
    use core::arch::asm;
    use xnix_abi::ipc::MsgHeader;
    use xnix_abi::spawn::{set_slot_str, SpawnArgs, SPAWN_TYPE_MODULE, SPAWN_TYPE_PATH};
    use xnix_abi::sysno::*;
    use xnix_abi::{Handle, HANDLE_INVALID, WNOHANG};

    fn syscall(nr: u32, a: u32, b: u32, c: u32, d: u32, e: u32) -> i32 {
        let ret: i32;
        unsafe {
            asm!(
                "int 0x30",
                inlateout("eax") nr => ret,
                in("ebx") a,
                in("ecx") b,
                in("edx") c,
                in("esi") d,
                in("edi") e,
            );
        }
        ret
    }

    pub struct KernelSys;

    impl KernelSys {
        fn fill_args(req: &StartRequest) -> SpawnArgs {
            let mut args = SpawnArgs::zeroed();
            set_slot_str(&mut args.name, &req.name);
            if let Some(profile) = &req.profile {
                set_slot_str(&mut args.profile, profile);
            }
            args.spawn_type =
                if req.use_path { SPAWN_TYPE_PATH } else { SPAWN_TYPE_MODULE };
            set_slot_str(&mut args.module_name, &req.module_name);
            set_slot_str(&mut args.path, &req.path);

            args.argc = req.args.len().min(args.argv.len()) as u32;
            for (slot, arg) in args.argv.iter_mut().zip(&req.args) {
                set_slot_str(slot, arg);
            }

            args.handle_count = req.handles.len().min(args.handles.len()) as u32;
            for (i, (name, handle)) in
                req.handles.iter().take(args.handles.len()).enumerate()
            {
                args.handles[i].src = *handle;
                args.handles[i].dst_hint = HANDLE_INVALID;
                set_slot_str(&mut args.handles[i].name, name);
            }
            args
        }
    }

    impl Sys for KernelSys {
        fn spawn(&mut self, req: &StartRequest) -> Result<i32, i32> {
            let args = Self::fill_args(req);
            let nr = if req.use_path { SYS_EXEC } else { SYS_SPAWN };
            let ret = syscall(nr, &args as *const _ as u32, 0, 0, 0, 0);
            if ret < 0 {
                Err(ret)
            } else {
                Ok(ret)
            }
        }

        fn endpoint_create(&mut self, name: &str) -> Option<Handle> {
            let mut buf = [0u8; 32];
            let n = name.len().min(31);
            buf[..n].copy_from_slice(&name.as_bytes()[..n]);
            let ret = syscall(SYS_ENDPOINT_CREATE, buf.as_ptr() as u32, 0, 0, 0, 0);
            (ret >= 0).then(|| ret as Handle)
        }

        fn handle_find(&mut self, name: &str) -> Option<Handle> {
            let mut buf = [0u8; 32];
            let n = name.len().min(31);
            buf[..n].copy_from_slice(&name.as_bytes()[..n]);
            let ret = syscall(SYS_HANDLE_FIND, buf.as_ptr() as u32, 0, 0, 0, 0);
            (ret >= 0).then(|| ret as Handle)
        }

        fn path_exists(&mut self, path: &str) -> bool {
            let mut buf = [0u8; 128];
            let n = path.len().min(127);
            buf[..n].copy_from_slice(&path.as_bytes()[..n]);
            // finfo on the path; any non-error answer means it exists.
            syscall(SYS_FINFO, buf.as_ptr() as u32, 0, 0, 0, 0) >= 0
        }

        fn probe_endpoint(&mut self, ep: Handle) -> bool {
            // Trivial VFS_INFO call with a short timeout.
            const UDM_VFS_INFO: u32 = 1;
            let mut req = MsgHeader::zeroed();
            req.regs.data[0] = UDM_VFS_INFO;
            let probe_path = b".\0";
            req.buffer_ptr = probe_path.as_ptr() as u32;
            req.buffer_len = 2;
            let mut reply = MsgHeader::zeroed();
            syscall(
                SYS_IPC_CALL,
                ep,
                &req as *const _ as u32,
                &mut reply as *mut _ as u32,
                500,
                0,
            ) == 0
        }

        fn vfs_mount(&mut self, path: &str, ep: Handle) -> Result<(), i32> {
            let mut buf = [0u8; 128];
            let n = path.len().min(127);
            buf[..n].copy_from_slice(&path.as_bytes()[..n]);
            let ret = syscall(SYS_MOUNT, buf.as_ptr() as u32, ep, 0, 0, 0);
            if ret < 0 {
                Err(ret)
            } else {
                Ok(())
            }
        }

        fn waitpid_nohang(&mut self) -> Option<(i32, i32)> {
            let mut status: i32 = 0;
            let pid = syscall(
                SYS_WAITPID,
                -1i32 as u32,
                &mut status as *mut _ as u32,
                WNOHANG as u32,
                0,
                0,
            );
            (pid > 0).then_some((pid, status))
        }

        fn log_line(&mut self, line: &str) {
            syscall(SYS_DEBUG_WRITE, line.as_ptr() as u32, line.len() as u32, 0, 0, 0);
            syscall(SYS_DEBUG_WRITE, b"\n".as_ptr() as u32, 1, 0, 0, 0);
        }
    }
}
