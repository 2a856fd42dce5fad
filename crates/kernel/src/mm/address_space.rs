//! Per-process address spaces.
//!
//! Every address space owns a page directory frame plus the PT frames
//! reachable from it through user PDEs. All spaces share the kernel's
//! mappings by PDE copy-down at creation: PDE 0 (low kernel identity map),
//! PDEs 768..1021 (high kernel half) and PDE 1022 (the temp-window PT).
//! Slot 1023 is the recursive self-mapping. Changes to kernel mappings
//! after creation propagate by convention, not automatically.
//!
//! All PD/PT edits — own or foreign — go through the temp-window primitive,
//! so editing another process's space is the same code path as editing our
//! own; only the trailing TLB invalidation differs.

use super::addr::{PhysAddr, PhysFrame, VirtAddr, PAGE_MASK};
use super::frame::{frame_alloc, frame_free};
use super::paging::{
    pd_index, pt_index, MapProt, PteFlags, ENTRIES_PER_TABLE, KERNEL_PDE_LOW, RECURSIVE_SLOT,
    TEMP_PT_SLOT,
};
use super::window::{with_table, zero_frame};
use crate::arch;
use crate::{KernelError, Result};

static KERNEL_PD: crate::sync::IrqMutex<Option<PhysFrame>> = crate::sync::IrqMutex::new(None);

pub struct AddressSpace {
    pd: PhysFrame,
    kernel: bool,
}

/// Build the kernel address space: identity-map `[0, idmap_end)`, install
/// the shared temp-window PT and the recursive slot. Called once at boot,
/// before the scheduler starts.
pub fn kernel_init(idmap_end: PhysAddr) -> Result<()> {
    let pd = frame_alloc()?;
    zero_frame(pd.start_address());

    // Identity map in 4 MiB chunks; PTEs are only made present below
    // idmap_end.
    let end = idmap_end.as_u32();
    let chunks = ((end + 0x3F_FFFF) >> 22) as usize;
    for chunk in 0..chunks.min(ENTRIES_PER_TABLE) {
        let pt = frame_alloc()?;
        zero_frame(pt.start_address());
        with_table(pt.start_address(), |t| {
            for (i, entry) in t.iter_mut().enumerate() {
                let paddr = ((chunk as u32) << 22) + ((i as u32) << 12);
                if paddr < end {
                    *entry = paddr | (PteFlags::PRESENT | PteFlags::RW).bits();
                }
            }
        });
        with_table(pd.start_address(), |t| {
            t[chunk] = pt.start_address().as_u32() | (PteFlags::PRESENT | PteFlags::RW).bits();
        });
    }

    // Shared temp-window PT and the recursive slot.
    let temp_pt = frame_alloc()?;
    zero_frame(temp_pt.start_address());
    with_table(pd.start_address(), |t| {
        t[TEMP_PT_SLOT] =
            temp_pt.start_address().as_u32() | (PteFlags::PRESENT | PteFlags::RW).bits();
        t[RECURSIVE_SLOT] = pd.start_address().as_u32() | (PteFlags::PRESENT | PteFlags::RW).bits();
    });

    *KERNEL_PD.lock() = Some(pd);
    crate::info!("vmm: kernel page directory at {:#x}", pd.start_address().as_u32());
    Ok(())
}

pub fn kernel_pd() -> PhysFrame {
    KERNEL_PD.lock().expect("vmm not initialized")
}

/// The kernel's shared address space, as a borrowable handle.
pub fn kernel_space() -> AddressSpace {
    AddressSpace { pd: kernel_pd(), kernel: true }
}

impl AddressSpace {
    /// Create a fresh user address space with the kernel mappings copied
    /// down and a new recursive slot.
    pub fn create() -> Result<Self> {
        let pd = frame_alloc()?;
        zero_frame(pd.start_address());

        let kpd = kernel_pd();
        let mut kernel_entries = [0u32; ENTRIES_PER_TABLE];
        with_table(kpd.start_address(), |t| kernel_entries.copy_from_slice(t));

        with_table(pd.start_address(), |t| {
            // PDE 0 carries the low kernel text identity map.
            t[0] = kernel_entries[0];
            for i in KERNEL_PDE_LOW..TEMP_PT_SLOT {
                if kernel_entries[i] & PteFlags::PRESENT.bits() != 0 {
                    t[i] = kernel_entries[i];
                }
            }
            t[TEMP_PT_SLOT] = kernel_entries[TEMP_PT_SLOT];
            t[RECURSIVE_SLOT] =
                pd.start_address().as_u32() | (PteFlags::PRESENT | PteFlags::RW).bits();
        });

        Ok(Self { pd, kernel: false })
    }

    pub fn pd_phys(&self) -> PhysFrame {
        self.pd
    }

    fn is_current(&self) -> bool {
        arch::current_pd() == Some(self.pd.start_address())
    }

    /// Install a mapping, creating the intermediate PT if absent.
    /// Idempotent for already-present PTEs of matching permissions.
    pub fn map(&mut self, vaddr: VirtAddr, paddr: PhysAddr, prot: MapProt) -> Result<()> {
        // Never hand the NULL page to user code.
        if vaddr.as_u32() < super::addr::PAGE_SIZE as u32 && prot.contains(MapProt::USER) {
            crate::error!(
                "map: refusing NULL page mapping (vaddr={:#x} paddr={:#x})",
                vaddr.as_u32(),
                paddr.as_u32()
            );
            return Err(KernelError::InvalidArgument);
        }

        let pdi = pd_index(vaddr);
        let pti = pt_index(vaddr);

        let pde = with_table(self.pd.start_address(), |t| t[pdi]);

        let pt_phys = if pde & PteFlags::PRESENT.bits() == 0 {
            // Allocate and zero the PT before touching the window; the
            // window lock is taken ahead of the bitmap lock, never inside.
            let pt = frame_alloc()?;
            zero_frame(pt.start_address());

            let mut pde_flags = PteFlags::PRESENT | PteFlags::RW;
            if prot.contains(MapProt::USER) {
                pde_flags |= PteFlags::USER;
            }
            with_table(self.pd.start_address(), |t| {
                t[pdi] = pt.start_address().as_u32() | pde_flags.bits();
            });
            pt.start_address()
        } else {
            // PDE exists: widen its permissions if this mapping needs more.
            let mut need = PteFlags::PRESENT.bits();
            if prot.contains(MapProt::USER) {
                need |= PteFlags::USER.bits();
            }
            if prot.contains(MapProt::WRITE) {
                need |= PteFlags::RW.bits();
            }
            if pde & need != need {
                with_table(self.pd.start_address(), |t| t[pdi] |= need);
            }
            PhysAddr::new(pde & PAGE_MASK)
        };

        with_table(pt_phys, |t| {
            t[pti] = (paddr.as_u32() & PAGE_MASK) | prot.to_pte_flags().bits();
        });

        if self.is_current() {
            arch::invlpg(vaddr.as_u32());
        }
        // A foreign space has no TLB entries to shoot down; it is not
        // running anywhere while its process is still being built.
        Ok(())
    }

    /// Zero the PTE for `vaddr`. The PT frame is kept even if it becomes
    /// empty.
    pub fn unmap(&mut self, vaddr: VirtAddr) {
        let pdi = pd_index(vaddr);
        let pti = pt_index(vaddr);

        let pde = with_table(self.pd.start_address(), |t| t[pdi]);
        if pde & PteFlags::PRESENT.bits() == 0 {
            return;
        }
        with_table(PhysAddr::new(pde & PAGE_MASK), |t| t[pti] = 0);

        if self.is_current() {
            arch::invlpg(vaddr.as_u32());
        }
    }

    /// Translate `vaddr`; `None` if unmapped.
    pub fn query(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let pdi = pd_index(vaddr);
        let pti = pt_index(vaddr);

        let pde = with_table(self.pd.start_address(), |t| t[pdi]);
        if pde & PteFlags::PRESENT.bits() == 0 {
            return None;
        }
        let pte = with_table(PhysAddr::new(pde & PAGE_MASK), |t| t[pti]);
        if pte & PteFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some(PhysAddr::new((pte & PAGE_MASK) | vaddr.page_offset()))
    }

    /// Raw PDE/PTE pair for `vaddr`; used by the fault handler's dump.
    pub fn table_entries(&self, vaddr: VirtAddr) -> (u32, u32) {
        let pdi = pd_index(vaddr);
        let pti = pt_index(vaddr);
        let pde = with_table(self.pd.start_address(), |t| t[pdi]);
        let pte = if pde & PteFlags::PRESENT.bits() != 0 {
            with_table(PhysAddr::new(pde & PAGE_MASK), |t| t[pti])
        } else {
            0
        };
        (pde, pte)
    }

    /// Tear the space down: free PT frames owned by user PDEs, then the PD.
    /// Kernel PTs are shared with every other space and must survive.
    pub fn destroy(self) {
        if self.kernel {
            panic!("attempt to destroy the kernel address space");
        }

        let mut entries = [0u32; ENTRIES_PER_TABLE];
        with_table(self.pd.start_address(), |t| entries.copy_from_slice(t));

        for pde in entries.iter().take(TEMP_PT_SLOT) {
            if pde & PteFlags::PRESENT.bits() != 0 && pde & PteFlags::USER.bits() != 0 {
                frame_free(PhysFrame::from_start(PhysAddr::new(pde & PAGE_MASK)));
            }
        }
        frame_free(self.pd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm;

    fn setup() {
        crate::arch::reset_for_test();
        let (start, end) = crate::arch::default_memory_range();
        mm::frame::init(start, end);
        kernel_init(end).unwrap();
    }

    #[test]
    fn map_query_unmap() {
        let _g = crate::test_util::guard();
        setup();

        let mut space = AddressSpace::create().unwrap();
        let frame = frame_alloc().unwrap();
        let va = VirtAddr::new(0x0804_8000);

        assert_eq!(space.query(va), None);
        space
            .map(va, frame.start_address(), MapProt::READ | MapProt::WRITE | MapProt::USER)
            .unwrap();
        assert_eq!(space.query(va), Some(frame.start_address()));
        // Offsets survive translation.
        assert_eq!(
            space.query(VirtAddr::new(va.as_u32() + 0x123)),
            Some(frame.start_address().add(0x123))
        );

        // Idempotent remap with the same permissions.
        space
            .map(va, frame.start_address(), MapProt::READ | MapProt::WRITE | MapProt::USER)
            .unwrap();
        assert_eq!(space.query(va), Some(frame.start_address()));

        space.unmap(va);
        assert_eq!(space.query(va), None);
        space.destroy();
    }

    #[test]
    fn null_page_user_mapping_rejected() {
        let _g = crate::test_util::guard();
        setup();

        let mut space = AddressSpace::create().unwrap();
        let frame = frame_alloc().unwrap();
        let err = space
            .map(VirtAddr::new(0), frame.start_address(), MapProt::READ | MapProt::USER)
            .unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument);
        space.destroy();
    }

    #[test]
    fn create_copies_kernel_pdes() {
        let _g = crate::test_util::guard();
        setup();

        let space = AddressSpace::create().unwrap();
        let kpd = kernel_pd();

        let mut kernel_entries = [0u32; ENTRIES_PER_TABLE];
        with_table(kpd.start_address(), |t| kernel_entries.copy_from_slice(t));
        let mut user_entries = [0u32; ENTRIES_PER_TABLE];
        with_table(space.pd_phys().start_address(), |t| user_entries.copy_from_slice(t));

        assert_eq!(user_entries[0], kernel_entries[0]);
        assert_eq!(user_entries[TEMP_PT_SLOT], kernel_entries[TEMP_PT_SLOT]);
        // Fresh recursive slot points at the new PD, not the kernel's.
        assert_eq!(
            user_entries[RECURSIVE_SLOT] & PAGE_MASK,
            space.pd_phys().start_address().as_u32()
        );
        assert_ne!(user_entries[RECURSIVE_SLOT], kernel_entries[RECURSIVE_SLOT]);
        space.destroy();
    }

    #[test]
    fn destroy_returns_user_pt_frames() {
        let _g = crate::test_util::guard();
        setup();

        let free_before = mm::frame::free_count();
        let mut space = AddressSpace::create().unwrap();
        let frame = frame_alloc().unwrap();
        space
            .map(
                VirtAddr::new(0x0804_8000),
                frame.start_address(),
                MapProt::READ | MapProt::USER,
            )
            .unwrap();
        space.destroy();
        frame_free(frame);
        assert_eq!(mm::frame::free_count(), free_before);
    }
}
