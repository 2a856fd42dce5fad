//! Memory syscalls (band 400-499).

use super::current_proc;
use crate::mm::{self, MapProt, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::perm::nodes;
use crate::syscall::uaccess;
use crate::{KernelError, Result};
use xnix_abi::{HandleType, Rights};

/// Grow (or probe) the program break. Negative increments are rejected;
/// freed heap never returns.
pub fn sys_sbrk(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let increment = args[0] as i32;

    let old_brk = proc.brk();
    if increment == 0 {
        return Ok(old_brk);
    }
    if increment < 0 {
        return Err(KernelError::InvalidArgument);
    }

    let new_brk = old_brk
        .checked_add(increment as u32)
        .ok_or(KernelError::InvalidArgument)?;
    if new_brk >= crate::config::USER_TSTACK_BASE {
        return Err(KernelError::OutOfMemory);
    }

    // Map every page in [old_brk, new_brk) that is not already present.
    proc.with_aspace(|space| -> Result<()> {
        let mut page = old_brk & !(PAGE_SIZE as u32 - 1);
        while page < new_brk {
            let va = VirtAddr::new(page);
            if space.query(va).is_none() {
                let frame = mm::frame_alloc()?;
                mm::window::zero_frame(frame.start_address());
                space.map(va, frame.start_address(), MapProt::READ | MapProt::WRITE | MapProt::USER)?;
            }
            page += PAGE_SIZE as u32;
        }
        Ok(())
    })??;

    proc.set_brk(new_brk);
    Ok(old_brk)
}

/// Map a named physical region (framebuffer, VGA text memory) into the
/// caller's space at `args[1]`.
pub fn sys_mmap_phys(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    if !proc.perm().check_name(nodes::MEM_PHYS) {
        return Err(KernelError::PermissionDenied);
    }

    let region = match proc.handles().lookup(args[0], HandleType::PhysMem, Rights::WRITE)? {
        crate::cap::KObject::PhysMem(r) => r,
        _ => return Err(KernelError::BadHandle),
    };

    let dst = args[1];
    if dst & (PAGE_SIZE as u32 - 1) != 0 || dst == 0 {
        return Err(KernelError::InvalidArgument);
    }

    let pages = (region.len + PAGE_SIZE - 1) / PAGE_SIZE;
    proc.with_aspace(|space| -> Result<()> {
        for i in 0..pages as u32 {
            space.map(
                VirtAddr::new(dst + i * PAGE_SIZE as u32),
                PhysAddr::new(region.base.as_u32() + i * PAGE_SIZE as u32),
                MapProt::READ | MapProt::WRITE | MapProt::USER | MapProt::NOCACHE,
            )?;
        }
        Ok(())
    })??;
    Ok(dst)
}

/// Write `{base, len}` of a physmem handle to user memory.
pub fn sys_physmem_info(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    let region = match proc.handles().lookup(args[0], HandleType::PhysMem, Rights::READ)? {
        crate::cap::KObject::PhysMem(r) => r,
        _ => return Err(KernelError::BadHandle),
    };

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct PhysmemInfo {
        base: u32,
        len: u32,
    }
    let info = PhysmemInfo { base: region.base.as_u32(), len: region.len as u32 };
    uaccess::struct_to_user(&proc, args[1], &info)?;
    Ok(0)
}
