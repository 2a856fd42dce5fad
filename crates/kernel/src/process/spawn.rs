//! Fork-less process creation.
//!
//! `spawn` builds the whole child before its first instruction runs:
//! process + address space, inherited handles, ELF placement, user stack,
//! marshalled argv, and finally a bootstrap thread whose trampoline drops
//! to ring 3. Every failure step rolls the partial process back.

use super::elf::{load_elf, map_user_stack, poke_user_bytes, poke_user_u32};
use super::{create, destroy, Process};
use crate::config::USER_STACK_TOP;
use crate::klog::Facility;
use crate::sched;
use crate::{KernelError, Result};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use xnix_abi::spawn::{slot_str, SpawnArgs, SPAWN_MAX_HANDLES};
use xnix_abi::{Pid, Rights, HANDLE_INVALID};

struct UserEntry {
    eip: u32,
    esp: u32,
}

/// First code of every user process: activate the address space and drop
/// to user mode at the ELF entry with the prepared stack.
extern "C" fn user_thread_trampoline(arg: usize) {
    let info = unsafe { Box::from_raw(arg as *mut UserEntry) };
    let proc = super::current();
    let pd = proc
        .with_aspace(|space| space.pd_phys())
        .expect("user process without address space");
    crate::arch::switch_pd(pd.start_address());
    unsafe {
        crate::arch::enter_user_mode(info.eip, info.esp);
    }
}

/// Duplicate the spawn-arg handles into the child. The entry keeps its
/// rights; the child-side name comes from the spawn args so the service
/// can find it with `handle_find`. A destination-hint mismatch is reported
/// but not fatal.
fn inherit_handles(creator: &Arc<Process>, proc: &Arc<Process>, args: &SpawnArgs) -> Result<()> {
    let count = (args.handle_count as usize).min(SPAWN_MAX_HANDLES);
    for spec in args.handles.iter().take(count) {
        let (object, rights) = creator.handles().get(spec.src)?;
        if !rights.contains(Rights::GRANT) {
            return Err(KernelError::PermissionDenied);
        }
        let name = slot_str(&spec.name);
        let handle = proc.handles().alloc_at(object, rights, name, spec.dst_hint)?;
        if spec.dst_hint != HANDLE_INVALID && handle != spec.dst_hint {
            crate::warn!(
                "spawn: inherited handle mismatch ({} -> {})",
                spec.dst_hint,
                handle
            );
        }
    }
    Ok(())
}

/// Lay argv out on the child's stack: string blob just under the stack
/// top, then the NULL-terminated pointer array, then `argc, argv` at a
/// 16-byte-aligned frame. Returns the initial ESP.
fn setup_argv(proc: &Arc<Process>, argv: &[&str]) -> Result<u32> {
    proc.with_aspace(|space| {
        let strings_size: u32 = argv.iter().map(|a| a.len() as u32 + 1).sum();
        let strings_start = (USER_STACK_TOP - strings_size) & !3;
        let array_size = (argv.len() as u32 + 1) * 4;
        let array_addr = (strings_start - array_size) & !3;
        let final_esp = (array_addr - 8) & !15;

        let mut str_off = strings_start;
        for (i, arg) in argv.iter().enumerate() {
            let mut bytes = Vec::with_capacity(arg.len() + 1);
            bytes.extend_from_slice(arg.as_bytes());
            bytes.push(0);
            poke_user_bytes(space, str_off, &bytes)?;
            poke_user_u32(space, array_addr + i as u32 * 4, str_off)?;
            str_off += bytes.len() as u32;
        }
        poke_user_u32(space, array_addr + argv.len() as u32 * 4, 0)?;

        poke_user_u32(space, final_esp, argv.len() as u32)?;
        poke_user_u32(space, final_esp + 4, array_addr)?;
        Ok(final_esp)
    })?
}

/// Spawn a process from explicit ELF bytes. The module/path resolution of
/// the syscall layer funnels into this.
pub fn spawn_from_elf(
    creator: &Arc<Process>,
    name: &str,
    profile: &str,
    elf_data: &[u8],
    argv: &[&str],
    args: &SpawnArgs,
) -> Result<Pid> {
    let proc = create(name)?;

    // Parent/child linkage and cwd inheritance.
    proc.set_parent(creator);
    creator.add_child(proc.clone());
    proc.set_cwd(&creator.cwd());

    let result = (|| -> Result<Pid> {
        if !profile.is_empty() {
            proc.perm().apply_profile(profile);
        }

        inherit_handles(creator, &proc, args)?;

        let entry = proc.with_aspace(|space| load_elf(space, elf_data))??;
        proc.with_aspace(map_user_stack)??;

        let esp = if argv.is_empty() {
            let esp = (USER_STACK_TOP - 16) & !15;
            proc.with_aspace(|space| {
                poke_user_u32(space, esp, 0)?; // argc = 0
                poke_user_u32(space, esp + 4, 0) // argv = NULL
            })??;
            esp
        } else {
            setup_argv(&proc, argv)?
        };

        let info = Box::new(UserEntry { eip: entry, esp });
        let thread = sched::thread_create_with_owner(
            "bootstrap",
            user_thread_trampoline,
            Box::into_raw(info) as usize,
            Some(proc.clone()),
        )?;
        proc.add_thread(thread);
        Ok(proc.pid())
    })();

    match result {
        Ok(pid) => {
            crate::klog::log(
                crate::klog::LogLevel::Debug,
                Facility::Proc,
                format_args!("spawned {} (pid {})", name, pid),
            );
            Ok(pid)
        }
        Err(e) => {
            creator.remove_child(&proc);
            destroy(&proc);
            Err(e)
        }
    }
}

/// Spawn from wire-format arguments: resolves the module image and unpacks
/// name/profile/argv slots.
pub fn spawn(creator: &Arc<Process>, args: &SpawnArgs, elf_data: Option<&[u8]>) -> Result<Pid> {
    let name = slot_str(&args.name);
    if name.is_empty() {
        return Err(KernelError::InvalidArgument);
    }
    let profile = slot_str(&args.profile);

    let module;
    let elf_data = match elf_data {
        Some(data) => data,
        None => {
            let module_name = slot_str(&args.module_name);
            module = crate::boot::modules::find(module_name).ok_or(KernelError::NotFound)?;
            module
        }
    };

    let argc = (args.argc as usize).min(args.argv.len());
    let argv: Vec<&str> = args.argv[..argc].iter().map(|slot| slot_str(slot)).collect();

    spawn_from_elf(creator, name, profile, elf_data, &argv, args)
}

/// Create an additional user thread in `proc`: two fresh stack pages in
/// the thread-stack region, the argument planted as the C-ABI parameter,
/// entry through the user trampoline.
pub fn create_user_thread(
    proc: &Arc<Process>,
    entry: u32,
    arg: u32,
) -> Result<Arc<crate::sched::Thread>> {
    let stack_top = proc.alloc_tstack_top();

    proc.with_aspace(|space| -> Result<()> {
        for i in 1..=crate::config::USER_STACK_PAGES as u32 {
            let va = crate::mm::VirtAddr::new(stack_top - i * crate::mm::PAGE_SIZE as u32);
            let frame = crate::mm::frame_alloc()?;
            crate::mm::window::zero_frame(frame.start_address());
            space.map(
                va,
                frame.start_address(),
                crate::mm::MapProt::READ | crate::mm::MapProt::WRITE | crate::mm::MapProt::USER,
            )?;
        }
        Ok(())
    })??;

    let esp = (stack_top - 16) & !15;
    proc.with_aspace(|space| {
        poke_user_u32(space, esp, 0)?; // fake return address
        poke_user_u32(space, esp + 4, arg)
    })??;

    let info = Box::new(UserEntry { eip: entry, esp });
    let thread = sched::thread_create_with_owner(
        "uthread",
        user_thread_trampoline,
        Box::into_raw(info) as usize,
        Some(proc.clone()),
    )?;
    proc.add_thread(thread.clone());
    Ok(thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::KObject;
    use crate::ipc::Endpoint;
    use crate::process;
    use crate::process::elf::peek_user_u32;
    use xnix_abi::spawn::{set_slot_str, SpawnHandle};
    use xnix_abi::HandleType;

    fn fresh() {
        crate::arch::reset_for_test();
        let (start, end) = crate::arch::default_memory_range();
        crate::mm::frame::init(start, end);
        crate::mm::address_space::kernel_init(end).unwrap();
        crate::sched::reset_for_test();
        process::reset_for_test();
    }

    fn basic_args(name: &str) -> SpawnArgs {
        let mut args = SpawnArgs::zeroed();
        set_slot_str(&mut args.name, name);
        args
    }

    fn demo_elf() -> Vec<u8> {
        crate::process::elf::tests::build_elf(0x0804_8000, 0x0804_8000, b"\x90\x90\xC3", false)
    }

    #[test]
    fn spawn_builds_process_with_thread_and_parent() {
        let _g = crate::test_util::guard();
        fresh();

        let creator = process::kernel_process();
        let args = basic_args("svc");
        let pid = spawn(&creator, &args, Some(&demo_elf())).unwrap();

        let proc = process::find_by_pid(pid).expect("spawned process registered");
        assert_eq!(proc.name(), "svc");
        assert_eq!(proc.thread_count(), 1);
        let parent = proc.parent().expect("has parent");
        assert!(Arc::ptr_eq(&parent, &creator));
        assert!(creator.children_snapshot().iter().any(|c| Arc::ptr_eq(c, &proc)));
    }

    #[test]
    fn argv_is_marshalled_onto_the_child_stack() {
        let _g = crate::test_util::guard();
        fresh();

        let creator = process::kernel_process();
        let mut args = basic_args("hello");
        args.argc = 2;
        set_slot_str(&mut args.argv[0], "hello");
        set_slot_str(&mut args.argv[1], "world");

        let pid = spawn(&creator, &args, Some(&demo_elf())).unwrap();
        let proc = process::find_by_pid(pid).unwrap();

        // Read the child's stack back through the kernel windows: the
        // frame holds argc then the argv array pointer; the array holds
        // pointers into the string blob.
        proc.with_aspace(|space| {
            // argc/argv sit at the 16-byte-aligned frame computed from the
            // marshalled sizes: strings 12 bytes, array 3 entries.
            let strings_size: u32 = 6 + 6;
            let strings_start = (USER_STACK_TOP - strings_size) & !3;
            let array_addr = (strings_start - 12) & !3;
            let esp = (array_addr - 8) & !15;

            assert_eq!(peek_user_u32(space, esp).unwrap(), 2);
            assert_eq!(peek_user_u32(space, esp + 4).unwrap(), array_addr);

            let p0 = peek_user_u32(space, array_addr).unwrap();
            let p1 = peek_user_u32(space, array_addr + 4).unwrap();
            assert_eq!(peek_user_u32(space, array_addr + 8).unwrap(), 0);

            let mut buf = [0u8; 6];
            super::super::elf::peek_user_bytes(space, p0, &mut buf).unwrap();
            assert_eq!(&buf, b"hello\0");
            super::super::elf::peek_user_bytes(space, p1, &mut buf).unwrap();
            assert_eq!(&buf, b"world\0");
        })
        .unwrap();
    }

    #[test]
    fn handles_are_inherited_with_rights_and_names() {
        let _g = crate::test_util::guard();
        fresh();

        let creator = process::kernel_process();
        let ep = Endpoint::new("vfs");
        let src = creator
            .handles()
            .alloc(KObject::Endpoint(ep), Rights::READ | Rights::WRITE | Rights::GRANT, "vfs")
            .unwrap();

        let mut args = basic_args("fsd");
        args.handle_count = 1;
        args.handles[0] = SpawnHandle::empty();
        args.handles[0].src = src;
        args.handles[0].dst_hint = 3;
        set_slot_str(&mut args.handles[0].name, "vfs");

        let pid = spawn(&creator, &args, Some(&demo_elf())).unwrap();
        let proc = process::find_by_pid(pid).unwrap();

        let child_h = proc.handles().find_by_name("vfs").expect("child got the handle");
        assert_eq!(child_h, 3);
        let (obj, rights) = proc.handles().get(child_h).unwrap();
        assert_eq!(obj.handle_type(), HandleType::Endpoint);
        assert_eq!(rights, Rights::READ | Rights::WRITE | Rights::GRANT);
    }

    #[test]
    fn spawn_without_grant_fails_and_rolls_back() {
        let _g = crate::test_util::guard();
        fresh();

        let creator = process::kernel_process();
        let ep = Endpoint::new("priv");
        let src = creator
            .handles()
            .alloc(KObject::Endpoint(ep), Rights::READ, "priv")
            .unwrap();

        let before = process::process_count();
        let mut args = basic_args("fsd");
        args.handle_count = 1;
        args.handles[0] = SpawnHandle::empty();
        args.handles[0].src = src;
        set_slot_str(&mut args.handles[0].name, "priv");

        let err = spawn(&creator, &args, Some(&demo_elf())).unwrap_err();
        assert_eq!(err, KernelError::PermissionDenied);
        assert_eq!(process::process_count(), before);
        assert!(creator.children_snapshot().is_empty());
    }

    #[test]
    fn unknown_module_is_not_found() {
        let _g = crate::test_util::guard();
        fresh();

        let creator = process::kernel_process();
        let mut args = basic_args("ghost");
        set_slot_str(&mut args.module_name, "no-such-module");
        assert_eq!(spawn(&creator, &args, None).unwrap_err(), KernelError::NotFound);
    }
}
