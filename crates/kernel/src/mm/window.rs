//! Scoped temp-window access to arbitrary physical frames.
//!
//! `with_frame` is the only way to read or write frame contents: it takes
//! the window lock with IRQs saved, maps the frame at the per-CPU scratch
//! slot, hands the caller a byte view, and unmaps on every exit path. The
//! closure must not block or call back into the frame allocator — the lock
//! order is window -> frame bitmap, and any PT frames a mapping operation
//! needs are allocated before the window is taken.

use super::addr::{PhysAddr, PAGE_SIZE};
use super::paging::ENTRIES_PER_TABLE;
use crate::arch;
use crate::sync::IrqMutex;

static WINDOW_LOCK: IrqMutex<()> = IrqMutex::new(());

/// Map `frame` into the scratch window for the duration of `f`.
pub fn with_frame<R>(frame: PhysAddr, f: impl FnOnce(&mut [u8]) -> R) -> R {
    debug_assert!(frame.is_page_aligned());
    let _guard = WINDOW_LOCK.lock();
    let ptr = unsafe { arch::window_map(frame) };
    let slice = unsafe { core::slice::from_raw_parts_mut(ptr, PAGE_SIZE) };
    let result = f(slice);
    unsafe { arch::window_unmap() };
    result
}

/// `with_frame`, viewed as a page table.
pub fn with_table<R>(table: PhysAddr, f: impl FnOnce(&mut [u32; ENTRIES_PER_TABLE]) -> R) -> R {
    with_frame(table, |bytes| {
        // A 4 KiB frame is exactly 1024 little-endian entries.
        let table = unsafe { &mut *(bytes.as_mut_ptr() as *mut [u32; ENTRIES_PER_TABLE]) };
        f(table)
    })
}

/// Zero a frame through the window.
pub fn zero_frame(frame: PhysAddr) {
    with_frame(frame, |bytes| bytes.fill(0));
}

/// Copy `src` into the frame at `frame`, starting at `offset`.
pub fn write_frame(frame: PhysAddr, offset: usize, src: &[u8]) {
    debug_assert!(offset + src.len() <= PAGE_SIZE);
    with_frame(frame, |bytes| bytes[offset..offset + src.len()].copy_from_slice(src));
}

/// Read `dst.len()` bytes out of the frame at `frame`, starting at `offset`.
pub fn read_frame(frame: PhysAddr, offset: usize, dst: &mut [u8]) {
    debug_assert!(offset + dst.len() <= PAGE_SIZE);
    with_frame(frame, |bytes| dst.copy_from_slice(&bytes[offset..offset + dst.len()]));
}
