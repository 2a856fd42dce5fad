//! Memory management: physical frames, paging, temp windows, address
//! spaces and fault dispatch.

pub mod addr;
pub mod address_space;
pub mod fault;
pub mod frame;
pub mod paging;
pub mod physmem;
pub mod window;

pub use addr::{PhysAddr, PhysFrame, VirtAddr, PAGE_SIZE};
pub use address_space::AddressSpace;
pub use frame::{frame_alloc, frame_alloc_contiguous, frame_free};
pub use paging::MapProt;

use crate::Result;

/// Bring up physical memory and the kernel address space over `[start, end)`.
pub fn init(start: PhysAddr, end: PhysAddr) -> Result<()> {
    frame::init(start, end);
    address_space::kernel_init(end)
}
