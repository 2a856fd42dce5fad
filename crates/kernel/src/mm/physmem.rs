//! Named physical memory regions handed to drivers through handles
//! (framebuffer aperture, VGA text memory, boot module images).

use super::addr::PhysAddr;

#[derive(Debug)]
pub struct PhysMemRegion {
    pub base: PhysAddr,
    pub len: usize,
}

impl PhysMemRegion {
    pub fn new(base: PhysAddr, len: usize) -> Self {
        Self { base, len }
    }

    pub fn contains(&self, addr: PhysAddr, len: usize) -> bool {
        let start = self.base.as_u32() as u64;
        let end = start + self.len as u64;
        let a = addr.as_u32() as u64;
        a >= start && a + len as u64 <= end
    }
}
