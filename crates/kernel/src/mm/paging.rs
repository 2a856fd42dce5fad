//! x86 two-level page-table layout: PD[1024] -> PT[1024], 4 KiB pages.
//!
//! Slot 1023 of every directory is the recursive self-mapping and slot 1022
//! holds the shared temp-window PT; user mappings stop at slot 1021.

use super::addr::VirtAddr;

/// PD slot that points back at the PD itself.
pub const RECURSIVE_SLOT: usize = 1023;
/// PD slot holding the shared temp-window PT.
pub const TEMP_PT_SLOT: usize = 1022;
/// First PD slot of the high kernel half.
pub const KERNEL_PDE_LOW: usize = 768;

/// Base virtual address at which the recursive slot exposes every PT.
pub const RECURSIVE_BASE: u32 = 0xFFC0_0000;
/// Virtual address of the PD itself through the recursive slot.
pub const RECURSIVE_PD: u32 = 0xFFFF_F000;

pub const ENTRIES_PER_TABLE: usize = 1024;

bitflags::bitflags! {
    /// Raw PTE/PDE bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const RW       = 1 << 1;
        const USER     = 1 << 2;
        const PWT      = 1 << 3;
        const PCD      = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Architecture-neutral mapping protections requested by callers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapProt: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const USER    = 1 << 2;
        /// Disable caching; MMIO mappings need this.
        const NOCACHE = 1 << 3;
    }
}

impl MapProt {
    pub fn to_pte_flags(self) -> PteFlags {
        let mut flags = PteFlags::PRESENT;
        if self.contains(MapProt::WRITE) {
            flags |= PteFlags::RW;
        }
        if self.contains(MapProt::USER) {
            flags |= PteFlags::USER;
        }
        if self.contains(MapProt::NOCACHE) {
            flags |= PteFlags::PCD | PteFlags::PWT;
        }
        flags
    }
}

pub const fn pd_index(vaddr: VirtAddr) -> usize {
    (vaddr.as_u32() >> 22) as usize
}

pub const fn pt_index(vaddr: VirtAddr) -> usize {
    ((vaddr.as_u32() >> 12) & 0x3FF) as usize
}

/// Virtual address covered by `PD[pd_idx], PT[pt_idx]`.
pub const fn table_indices_to_vaddr(pd_idx: usize, pt_idx: usize) -> VirtAddr {
    VirtAddr::new(((pd_idx as u32) << 22) | ((pt_idx as u32) << 12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_math_round_trips() {
        let va = VirtAddr::new(0xBFFF_E000);
        let (pdi, pti) = (pd_index(va), pt_index(va));
        assert_eq!(table_indices_to_vaddr(pdi, pti), va);
        assert_eq!(pd_index(VirtAddr::new(RECURSIVE_PD)), RECURSIVE_SLOT);
        assert_eq!(pt_index(VirtAddr::new(RECURSIVE_PD)), RECURSIVE_SLOT);
    }

    #[test]
    fn prot_conversion() {
        let f = (MapProt::READ | MapProt::WRITE | MapProt::USER).to_pte_flags();
        assert!(f.contains(PteFlags::PRESENT | PteFlags::RW | PteFlags::USER));
        let ro = MapProt::READ.to_pte_flags();
        assert!(ro.contains(PteFlags::PRESENT));
        assert!(!ro.contains(PteFlags::RW));
        let mmio = (MapProt::READ | MapProt::WRITE | MapProt::NOCACHE).to_pte_flags();
        assert!(mmio.contains(PteFlags::PCD | PteFlags::PWT));
    }
}
