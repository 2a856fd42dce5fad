//! Page-fault dispatch.
//!
//! User-mode faults terminate the faulting process with SIGSEGV (delivered
//! on the syscall-return path). Kernel-mode faults are invariant violations
//! and panic with a full decode of the error code plus the offending PDE
//! and PTE.

use super::addr::VirtAddr;
use super::address_space;
use crate::klog::Facility;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    NotPresent,
    WriteViolation,
    UserAccessViolation,
    ReservedBit,
    InstructionFetch,
    ProtectionViolation,
}

impl FaultReason {
    /// Decode the x86 page-fault error code.
    pub fn decode(err_code: u32) -> Self {
        if err_code & 0x01 == 0 {
            FaultReason::NotPresent
        } else if err_code & 0x08 != 0 {
            FaultReason::ReservedBit
        } else if err_code & 0x10 != 0 {
            FaultReason::InstructionFetch
        } else if err_code & 0x04 != 0 {
            FaultReason::UserAccessViolation
        } else if err_code & 0x02 != 0 {
            FaultReason::WriteViolation
        } else {
            FaultReason::ProtectionViolation
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultReason::NotPresent => "Not Present",
            FaultReason::WriteViolation => "Write Violation",
            FaultReason::UserAccessViolation => "User Access Violation",
            FaultReason::ReservedBit => "Reserved Bit Violation",
            FaultReason::InstructionFetch => "Instruction Fetch",
            FaultReason::ProtectionViolation => "Protection Violation",
        }
    }
}

pub fn handle_page_fault(vaddr: u32, err_code: u32, from_user: bool, eip: u32) {
    let reason = FaultReason::decode(err_code);

    // Dump the tables of whichever space the fault happened in.
    let space = address_space::kernel_space();
    let (pde, pte) = space.table_entries(VirtAddr::new(vaddr));

    crate::klog::log(
        crate::klog::LogLevel::Error,
        Facility::Mm,
        format_args!(
            "PAGE FAULT vaddr={:#x} eip={:#x} err={:#x} ({})",
            vaddr,
            eip,
            err_code,
            reason.as_str()
        ),
    );
    crate::error!(
        "  PDE={:#010x} PTE={:#010x} | PDE P={} RW={} U={} | PTE P={} RW={} U={}",
        pde,
        pte,
        pde & 1,
        (pde >> 1) & 1,
        (pde >> 2) & 1,
        pte & 1,
        (pte >> 1) & 1,
        (pte >> 2) & 1
    );

    if from_user {
        crate::process::terminate_current(xnix_abi::signal::SIGSEGV);
        return;
    }

    panic!(
        "kernel page fault at {:#x} (eip={:#x}, err={:#x}, {})",
        vaddr,
        eip,
        err_code,
        reason.as_str()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_decode() {
        assert_eq!(FaultReason::decode(0x0), FaultReason::NotPresent);
        assert_eq!(FaultReason::decode(0x2), FaultReason::NotPresent);
        assert_eq!(FaultReason::decode(0x3), FaultReason::WriteViolation);
        assert_eq!(FaultReason::decode(0x5), FaultReason::UserAccessViolation);
        assert_eq!(FaultReason::decode(0x9), FaultReason::ReservedBit);
        assert_eq!(FaultReason::decode(0x11), FaultReason::InstructionFetch);
        assert_eq!(FaultReason::decode(0x1), FaultReason::ProtectionViolation);
    }
}
