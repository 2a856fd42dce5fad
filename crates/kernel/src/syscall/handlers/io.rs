//! I/O syscalls (band 500-599): port access and the IRQ bridge.

use super::current_proc;
use crate::ipc::irq;
use crate::perm::nodes;
use crate::{KernelError, Result};
use xnix_abi::sysno::{SYS_IOPORT_INB, SYS_IOPORT_INW, SYS_IOPORT_OUTB, SYS_IOPORT_OUTW};
use xnix_abi::{HandleType, Rights};

/// Raw port I/O for userland drivers. Only exists on bare-metal x86 and
/// only for processes granted the port permission.
pub fn sys_ioport(nr: u32, args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    if !proc.perm().check_name(nodes::IO_PORT) {
        return Err(KernelError::PermissionDenied);
    }

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        let port = args[0] as u16;
        unsafe {
            match nr {
                SYS_IOPORT_OUTB => {
                    crate::arch::x86::outb(port, args[1] as u8);
                    Ok(0)
                }
                SYS_IOPORT_INB => Ok(crate::arch::x86::inb(port) as u32),
                SYS_IOPORT_OUTW => {
                    crate::arch::x86::outw(port, args[1] as u16);
                    Ok(0)
                }
                SYS_IOPORT_INW => Ok(crate::arch::x86::inw(port) as u32),
                _ => Err(KernelError::InvalidArgument),
            }
        }
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        let _ = (nr, args, SYS_IOPORT_OUTB, SYS_IOPORT_INB, SYS_IOPORT_OUTW, SYS_IOPORT_INW);
        Err(KernelError::NotSupported)
    }
}

/// Bind an IRQ line to one of the caller's notifications.
pub fn sys_irq_bind(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    if !proc.perm().check_name(nodes::IO_IRQ) {
        return Err(KernelError::PermissionDenied);
    }

    let notif = proc
        .handles()
        .lookup(args[1], HandleType::Notification, Rights::WRITE)?
        .as_notification()?;
    irq::bind(args[0] as u8, notif, args[2])?;
    Ok(0)
}

pub fn sys_irq_unbind(args: &[u32; 5]) -> Result<u32> {
    let proc = current_proc();
    if !proc.perm().check_name(nodes::IO_IRQ) {
        return Err(KernelError::PermissionDenied);
    }
    irq::unbind(args[0] as u8)?;
    Ok(0)
}

/// Bits a bound IRQ line delivers; 0 when unbound.
pub fn sys_irq_read(args: &[u32; 5]) -> Result<u32> {
    Ok(irq::bound_bits(args[0] as u8))
}
