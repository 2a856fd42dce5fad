//! IRQ-to-notification bridge.
//!
//! Userland drivers bind an IRQ line to a notification and block in
//! `notification_wait` instead of polling. The kernel's IRQ handler calls
//! `deliver`, which signals the bound notification with the bound bits.

use super::Notification;
use crate::config::NR_IRQS;
use crate::sync::IrqMutex;
use crate::{KernelError, Result};
use alloc::sync::Arc;

struct IrqBinding {
    notif: Arc<Notification>,
    bits: u32,
}

struct Bindings {
    slots: [Option<IrqBinding>; NR_IRQS],
}

const NONE_BINDING: Option<IrqBinding> = None;

static BINDINGS: IrqMutex<Bindings> = IrqMutex::new(Bindings { slots: [NONE_BINDING; NR_IRQS] });

pub fn bind(irq: u8, notif: Arc<Notification>, bits: u32) -> Result<()> {
    let idx = irq as usize;
    if idx >= NR_IRQS || bits == 0 {
        return Err(KernelError::InvalidArgument);
    }
    let mut b = BINDINGS.lock();
    if b.slots[idx].is_some() {
        return Err(KernelError::AlreadyExists);
    }
    b.slots[idx] = Some(IrqBinding { notif, bits });
    drop(b);

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    crate::arch::x86::interrupts::unmask_irq(irq);
    Ok(())
}

pub fn unbind(irq: u8) -> Result<()> {
    let idx = irq as usize;
    if idx >= NR_IRQS {
        return Err(KernelError::InvalidArgument);
    }
    let mut b = BINDINGS.lock();
    if b.slots[idx].take().is_none() {
        return Err(KernelError::NotFound);
    }
    Ok(())
}

/// Bits a bound line will deliver; 0 if unbound.
pub fn bound_bits(irq: u8) -> u32 {
    let idx = irq as usize;
    if idx >= NR_IRQS {
        return 0;
    }
    BINDINGS.lock().slots[idx].as_ref().map_or(0, |b| b.bits)
}

/// Called from the kernel IRQ path.
pub fn deliver(irq: u8) {
    let idx = irq as usize;
    if idx >= NR_IRQS {
        return;
    }
    let binding = {
        let b = BINDINGS.lock();
        b.slots[idx].as_ref().map(|bind| (bind.notif.clone(), bind.bits))
    };
    if let Some((notif, bits)) = binding {
        notif.signal(bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_deliver_unbind() {
        let _g = crate::test_util::guard();
        crate::arch::reset_for_test();
        crate::sched::reset_for_test();

        // A private line nobody else uses.
        let _ = unbind(13);
        let n = Notification::new();
        bind(13, n.clone(), 0b100).unwrap();
        assert_eq!(bound_bits(13), 0b100);
        assert_eq!(bind(13, n.clone(), 1).unwrap_err(), KernelError::AlreadyExists);

        deliver(13);
        assert_eq!(n.pending(), 0b100);

        unbind(13).unwrap();
        assert_eq!(bound_bits(13), 0);
        assert_eq!(unbind(13).unwrap_err(), KernelError::NotFound);

        assert_eq!(bind(16, n, 1).unwrap_err(), KernelError::InvalidArgument);
    }
}
