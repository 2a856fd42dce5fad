//! Bitmap physical page allocator.
//!
//! One bit per 4 KiB frame, 0 = free, 1 = allocated. The bitmap itself is
//! sited at the start of the managed range and its pages are excluded from
//! the allocatable pool (the bitmap does not track itself). A single
//! IRQ-saving spinlock protects the bitmap; the allocator is called from
//! interrupt-driven paths.

use super::addr::{PhysAddr, PhysFrame, PAGE_SIZE};
use crate::arch;
use crate::sync::IrqMutex;
use crate::{KernelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    OutOfRange,
    DoubleFree,
}

pub struct FrameAllocator {
    /// Physical location of the bitmap words.
    bitmap: PhysAddr,
    /// First allocatable frame (just past the bitmap pages).
    base: PhysAddr,
    end: PhysAddr,
    total: usize,
    free: usize,
}

impl FrameAllocator {
    /// Carve a bitmap out of the start of `[start, end)` and manage the
    /// rest as allocatable frames.
    pub fn new(start: PhysAddr, end: PhysAddr) -> Self {
        let start = start.align_up();
        let end = end.align_down();
        let raw_pages = ((end.as_u32() - start.as_u32()) as usize) / PAGE_SIZE;

        let bitmap_bytes = (raw_pages + 7) / 8;
        let bitmap_pages = (bitmap_bytes + PAGE_SIZE - 1) / PAGE_SIZE;

        let base = start.add((bitmap_pages * PAGE_SIZE) as u32);
        let total = ((end.as_u32() - base.as_u32()) as usize) / PAGE_SIZE;

        // Clear the bitmap through the identity window.
        unsafe {
            core::ptr::write_bytes(arch::phys_to_virt(start), 0, bitmap_bytes);
        }

        Self { bitmap: start, base, end, total, free: total }
    }

    fn word_ptr(&self, word: usize) -> *mut u32 {
        unsafe { (arch::phys_to_virt(self.bitmap) as *mut u32).add(word) }
    }

    fn test(&self, pfn: usize) -> bool {
        let w = unsafe { self.word_ptr(pfn / 32).read_volatile() };
        w & (1 << (pfn % 32)) != 0
    }

    fn set(&mut self, pfn: usize) {
        let p = self.word_ptr(pfn / 32);
        unsafe { p.write_volatile(p.read_volatile() | 1 << (pfn % 32)) };
    }

    fn clear(&mut self, pfn: usize) {
        let p = self.word_ptr(pfn / 32);
        unsafe { p.write_volatile(p.read_volatile() & !(1 << (pfn % 32))) };
    }

    fn frame_at(&self, pfn: usize) -> PhysFrame {
        PhysFrame::from_start(self.base.add((pfn * PAGE_SIZE) as u32))
    }

    /// First-fit single-frame allocation.
    pub fn alloc(&mut self) -> Result<PhysFrame> {
        for pfn in 0..self.total {
            if !self.test(pfn) {
                self.set(pfn);
                self.free -= 1;
                return Ok(self.frame_at(pfn));
            }
        }
        Err(KernelError::OutOfMemory)
    }

    /// Linear scan for `count` consecutive free frames.
    pub fn alloc_contiguous(&mut self, count: usize) -> Result<PhysFrame> {
        if count == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let mut run = 0;
        let mut run_start = 0;
        for pfn in 0..self.total {
            if self.test(pfn) {
                run = 0;
                continue;
            }
            if run == 0 {
                run_start = pfn;
            }
            run += 1;
            if run == count {
                for p in run_start..run_start + count {
                    self.set(p);
                }
                self.free -= count;
                return Ok(self.frame_at(run_start));
            }
        }
        Err(KernelError::OutOfMemory)
    }

    /// Release a frame. Double-frees and out-of-range addresses are
    /// reported to the caller and leave the bitmap untouched; they indicate
    /// a caller bug but must not take the allocator down.
    pub fn free(&mut self, frame: PhysFrame) -> core::result::Result<(), FreeError> {
        let addr = frame.start_address();
        if addr < self.base || addr >= self.end {
            return Err(FreeError::OutOfRange);
        }
        let pfn = ((addr.as_u32() - self.base.as_u32()) as usize) / PAGE_SIZE;
        if !self.test(pfn) {
            return Err(FreeError::DoubleFree);
        }
        self.clear(pfn);
        self.free += 1;
        Ok(())
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn total_count(&self) -> usize {
        self.total
    }
}

static FRAME_ALLOC: IrqMutex<Option<FrameAllocator>> = IrqMutex::new(None);

/// Hand `[start, end)` to the global allocator. Called once at boot.
pub fn init(start: PhysAddr, end: PhysAddr) {
    let alloc = FrameAllocator::new(start, end);
    crate::info!(
        "frame allocator: {} pages ({} KiB) managed, bitmap at {:#x}",
        alloc.total_count(),
        alloc.total_count() * 4,
        alloc.bitmap.as_u32()
    );
    *FRAME_ALLOC.lock() = Some(alloc);
}

fn with_alloc<R>(f: impl FnOnce(&mut FrameAllocator) -> Result<R>) -> Result<R> {
    let mut guard = FRAME_ALLOC.lock();
    let alloc = guard.as_mut().expect("frame allocator not initialized");
    f(alloc)
}

pub fn frame_alloc() -> Result<PhysFrame> {
    with_alloc(|a| a.alloc())
}

pub fn frame_alloc_contiguous(count: usize) -> Result<PhysFrame> {
    with_alloc(|a| a.alloc_contiguous(count))
}

pub fn frame_free(frame: PhysFrame) {
    // Log outside the bitmap lock; formatting may touch the kernel heap.
    let outcome = with_alloc(|a| Ok(a.free(frame)));
    match outcome {
        Ok(Err(FreeError::OutOfRange)) => {
            crate::warn!("frame_free: address {:#x} outside managed range",
                frame.start_address().as_u32());
        }
        Ok(Err(FreeError::DoubleFree)) => {
            crate::warn!("frame_free: double free of {:#x}", frame.start_address().as_u32());
        }
        _ => {}
    }
}

pub fn free_count() -> usize {
    with_alloc(|a| Ok(a.free_count())).unwrap_or(0)
}

pub fn total_count() -> usize {
    with_alloc(|a| Ok(a.total_count())).unwrap_or(0)
}
