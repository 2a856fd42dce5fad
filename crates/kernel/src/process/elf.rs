//! ELF32 placement into a fresh address space.
//!
//! Only static i386 executables are accepted. Parsing reads fields out of
//! the byte slice directly; placement maps each PT_LOAD page with the
//! segment's requested protection and copies the file bytes in through the
//! kernel's temp windows, so read-only segments stay read-only from the
//! start.

use crate::mm::addr::{VirtAddr, PAGE_SIZE};
use crate::mm::frame::frame_alloc;
use crate::mm::paging::MapProt;
use crate::mm::window;
use crate::mm::AddressSpace;
use crate::{KernelError, Result};
use alloc::vec::Vec;

const EI_NIDENT: usize = 16;
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u32 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;

const PT_LOAD: u32 = 1;

const PF_W: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    Truncated,
    BadMagic,
    BadClass,
    BadEncoding,
    BadType,
    BadMachine,
    BadVersion,
}

impl From<ElfError> for KernelError {
    fn from(_: ElfError) -> Self {
        KernelError::InvalidArgument
    }
}

fn u16_at(data: &[u8], off: usize) -> core::result::Result<u16, ElfError> {
    let b = data.get(off..off + 2).ok_or(ElfError::Truncated)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(data: &[u8], off: usize) -> core::result::Result<u32, ElfError> {
    let b = data.get(off..off + 4).ok_or(ElfError::Truncated)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u32,
    pub offset: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
}

#[derive(Debug)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    pub entry: u32,
    phoff: u32,
    phentsize: u16,
    phnum: u16,
}

impl<'a> ElfImage<'a> {
    pub fn parse(data: &'a [u8]) -> core::result::Result<Self, ElfError> {
        if data.len() < EI_NIDENT + 36 {
            return Err(ElfError::Truncated);
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if data[4] != ELFCLASS32 {
            return Err(ElfError::BadClass);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::BadEncoding);
        }
        if u16_at(data, 16)? != ET_EXEC {
            return Err(ElfError::BadType);
        }
        if u16_at(data, 18)? != EM_386 {
            return Err(ElfError::BadMachine);
        }
        if u32_at(data, 20)? != EV_CURRENT {
            return Err(ElfError::BadVersion);
        }

        Ok(Self {
            data,
            entry: u32_at(data, 24)?,
            phoff: u32_at(data, 28)?,
            phentsize: u16_at(data, 42)?,
            phnum: u16_at(data, 44)?,
        })
    }

    pub fn segments(&self) -> core::result::Result<Vec<Segment>, ElfError> {
        let mut out = Vec::new();
        for i in 0..self.phnum as usize {
            let off = self.phoff as usize + i * self.phentsize as usize;
            let p_type = u32_at(self.data, off)?;
            if p_type != PT_LOAD {
                continue;
            }
            out.push(Segment {
                offset: u32_at(self.data, off + 4)?,
                vaddr: u32_at(self.data, off + 8)?,
                filesz: u32_at(self.data, off + 16)?,
                memsz: u32_at(self.data, off + 20)?,
                flags: u32_at(self.data, off + 24)?,
            });
        }
        Ok(out)
    }
}

fn segment_prot(flags: u32) -> MapProt {
    let mut prot = MapProt::READ | MapProt::USER;
    if flags & PF_W != 0 {
        prot |= MapProt::WRITE;
    }
    prot
}

/// Place `elf_data` into `space`: map every PT_LOAD page, zero it, copy the
/// file bytes through the temp windows. Returns the entry point.
pub fn load_elf(space: &mut AddressSpace, elf_data: &[u8]) -> Result<u32> {
    let image = ElfImage::parse(elf_data).map_err(|e| {
        crate::error!("invalid ELF header: {:?}", e);
        KernelError::from(e)
    })?;

    for seg in image.segments()? {
        if seg.filesz > seg.memsz {
            return Err(KernelError::InvalidArgument);
        }
        let prot = segment_prot(seg.flags);

        let page_start = VirtAddr::new(seg.vaddr).align_down().as_u32();
        let page_end = VirtAddr::new(seg.vaddr.checked_add(seg.memsz).ok_or(KernelError::InvalidArgument)?)
            .align_up()
            .as_u32();

        let mut page = page_start;
        while page < page_end {
            let va = VirtAddr::new(page);
            if space.query(va).is_none() {
                let frame = frame_alloc()?;
                window::zero_frame(frame.start_address());
                space.map(va, frame.start_address(), prot)?;
            }
            page += PAGE_SIZE as u32;
        }

        // Copy the file image page by page; the destination pages may lie
        // outside the kernel's identity-mapped range.
        let file = elf_data
            .get(seg.offset as usize..(seg.offset + seg.filesz) as usize)
            .ok_or(KernelError::InvalidArgument)?;
        let mut copied: usize = 0;
        while copied < file.len() {
            let dst_va = seg.vaddr as usize + copied;
            let page_off = dst_va % PAGE_SIZE;
            let chunk = (PAGE_SIZE - page_off).min(file.len() - copied);

            let page_va = VirtAddr::new((dst_va - page_off) as u32);
            let paddr = space.query(page_va).ok_or(KernelError::BadAddress)?;
            window::write_frame(paddr, page_off, &file[copied..copied + chunk]);
            copied += chunk;
        }
    }

    crate::info!("ELF loaded, entry point {:#x}", image.entry);
    Ok(image.entry)
}

/// Map and zero the two user stack pages just below `USER_STACK_TOP`.
pub fn map_user_stack(space: &mut AddressSpace) -> Result<()> {
    let top = crate::config::USER_STACK_TOP;
    for i in 1..=crate::config::USER_STACK_PAGES as u32 {
        let va = VirtAddr::new(top - i * PAGE_SIZE as u32);
        let frame = frame_alloc()?;
        window::zero_frame(frame.start_address());
        space.map(va, frame.start_address(), MapProt::READ | MapProt::WRITE | MapProt::USER)?;
    }
    Ok(())
}

/// Write a little-endian u32 into a user address of `space`.
pub fn poke_user_u32(space: &AddressSpace, va: u32, value: u32) -> Result<()> {
    poke_user_bytes(space, va, &value.to_le_bytes())
}

/// Write bytes into user memory through the temp windows, page by page.
pub fn poke_user_bytes(space: &AddressSpace, va: u32, bytes: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        let addr = va as usize + written;
        let page_off = addr % PAGE_SIZE;
        let chunk = (PAGE_SIZE - page_off).min(bytes.len() - written);

        let page_va = VirtAddr::new((addr - page_off) as u32);
        let paddr = space.query(page_va).ok_or(KernelError::BadAddress)?;
        window::write_frame(paddr, page_off, &bytes[written..written + chunk]);
        written += chunk;
    }
    Ok(())
}

/// Read bytes out of user memory; the inverse of `poke_user_bytes`.
pub fn peek_user_bytes(space: &AddressSpace, va: u32, out: &mut [u8]) -> Result<()> {
    let mut read = 0;
    while read < out.len() {
        let addr = va as usize + read;
        let page_off = addr % PAGE_SIZE;
        let chunk = (PAGE_SIZE - page_off).min(out.len() - read);

        let page_va = VirtAddr::new((addr - page_off) as u32);
        let paddr = space.query(page_va).ok_or(KernelError::BadAddress)?;
        window::read_frame(paddr, page_off, &mut out[read..read + chunk]);
        read += chunk;
    }
    Ok(())
}

pub fn peek_user_u32(space: &AddressSpace, va: u32) -> Result<u32> {
    let mut b = [0u8; 4];
    peek_user_bytes(space, va, &mut b)?;
    Ok(u32::from_le_bytes(b))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal static i386 executable: one PT_LOAD with a few code bytes.
    pub(crate) fn build_elf(entry: u32, vaddr: u32, payload: &[u8], writable: bool) -> Vec<u8> {
        let mut img = alloc::vec![0u8; 0x1000 + payload.len()];
        img[0..4].copy_from_slice(&ELF_MAGIC);
        img[4] = ELFCLASS32;
        img[5] = ELFDATA2LSB;
        img[6] = 1; // EV_CURRENT in e_ident
        img[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        img[18..20].copy_from_slice(&EM_386.to_le_bytes());
        img[20..24].copy_from_slice(&EV_CURRENT.to_le_bytes());
        img[24..28].copy_from_slice(&entry.to_le_bytes());
        img[28..32].copy_from_slice(&52u32.to_le_bytes()); // phoff
        img[42..44].copy_from_slice(&32u16.to_le_bytes()); // phentsize
        img[44..46].copy_from_slice(&1u16.to_le_bytes()); // phnum

        let ph = 52;
        img[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        img[ph + 4..ph + 8].copy_from_slice(&0x1000u32.to_le_bytes()); // offset
        img[ph + 8..ph + 12].copy_from_slice(&vaddr.to_le_bytes());
        img[ph + 16..ph + 20].copy_from_slice(&(payload.len() as u32).to_le_bytes()); // filesz
        img[ph + 20..ph + 24].copy_from_slice(&(payload.len() as u32 + 64).to_le_bytes()); // memsz
        let flags = if writable { 0x7u32 } else { 0x5u32 };
        img[ph + 24..ph + 28].copy_from_slice(&flags.to_le_bytes());

        img[0x1000..0x1000 + payload.len()].copy_from_slice(payload);
        img
    }

    fn setup() {
        crate::arch::reset_for_test();
        let (start, end) = crate::arch::default_memory_range();
        crate::mm::frame::init(start, end);
        crate::mm::address_space::kernel_init(end).unwrap();
    }

    #[test]
    fn rejects_bad_headers() {
        assert_eq!(ElfImage::parse(&[0u8; 10]).unwrap_err(), ElfError::Truncated);

        let mut img = build_elf(0x0804_8000, 0x0804_8000, b"xyz", true);
        img[0] = 0;
        assert_eq!(ElfImage::parse(&img).unwrap_err(), ElfError::BadMagic);

        let mut img = build_elf(0x0804_8000, 0x0804_8000, b"xyz", true);
        img[4] = 2; // 64-bit
        assert_eq!(ElfImage::parse(&img).unwrap_err(), ElfError::BadClass);

        let mut img = build_elf(0x0804_8000, 0x0804_8000, b"xyz", true);
        img[18] = 0x3E; // x86-64 machine
        assert_eq!(ElfImage::parse(&img).unwrap_err(), ElfError::BadMachine);
    }

    #[test]
    fn load_maps_and_copies_payload() {
        let _g = crate::test_util::guard();
        setup();

        let payload = b"text segment contents";
        let img = build_elf(0x0804_8010, 0x0804_8000, payload, false);

        let mut space = AddressSpace::create().unwrap();
        let entry = load_elf(&mut space, &img).unwrap();
        assert_eq!(entry, 0x0804_8010);

        let mut back = alloc::vec![0u8; payload.len()];
        peek_user_bytes(&space, 0x0804_8000, &mut back).unwrap();
        assert_eq!(&back, payload);

        // bss tail of the segment is zeroed.
        let mut tail = [0xFFu8; 16];
        peek_user_bytes(&space, 0x0804_8000 + payload.len() as u32, &mut tail).unwrap();
        assert!(tail.iter().all(|&b| b == 0));
    }

    #[test]
    fn user_stack_is_mapped_below_top() {
        let _g = crate::test_util::guard();
        setup();

        let mut space = AddressSpace::create().unwrap();
        map_user_stack(&mut space).unwrap();

        let top = crate::config::USER_STACK_TOP;
        assert!(space.query(VirtAddr::new(top - 0x1000)).is_some());
        assert!(space.query(VirtAddr::new(top - 0x2000)).is_some());
        assert!(space.query(VirtAddr::new(top)).is_none());
    }
}
