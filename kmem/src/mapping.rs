//! Translation between physical frames and the virtual addresses the kernel
//! uses to touch their contents.

use memunits::{PhysAddr, VirtAddr, PAGE_ALIGN_BITS};

use crate::physical::PageFrame;

/// An offset mapping that makes a contiguous span of physical memory directly
/// addressable. All allocator bookkeeping that lives inside managed frames
/// (the frame database, slab descriptors, object free lists) is reached
/// through this mapping.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct DirectMapping {
    virtual_base: VirtAddr,
    physical_base: PhysAddr,
    size: usize,
}

impl DirectMapping {
    /// Describe an existing mapping of `size` bytes of physical memory
    /// starting at `physical_base`.
    pub const fn new(virtual_base: VirtAddr, physical_base: PhysAddr, size: usize) -> DirectMapping {
        DirectMapping {
            virtual_base,
            physical_base,
            size,
        }
    }

    pub fn virtual_base(&self) -> VirtAddr {
        self.virtual_base
    }

    pub fn physical_base(&self) -> PhysAddr {
        self.physical_base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn contains_phys(&self, paddr: PhysAddr) -> bool {
        paddr >= self.physical_base && paddr - self.physical_base < self.size
    }

    pub fn contains_virt(&self, vaddr: VirtAddr) -> bool {
        vaddr >= self.virtual_base && vaddr - self.virtual_base < self.size
    }

    /// Translate a physical address inside the mapping, panicking when it
    /// lies outside. Allocator structures are always mapped, an untranslatable
    /// address here means corrupted bookkeeping.
    pub fn phys_to_virt(&self, paddr: PhysAddr) -> VirtAddr {
        assert!(
            self.contains_phys(paddr),
            "[kmem] physical address {:p} outside the direct mapping",
            paddr
        );
        self.virtual_base + (paddr - self.physical_base)
    }

    /// Inverse of [`DirectMapping::phys_to_virt`].
    pub fn virt_to_phys(&self, vaddr: VirtAddr) -> PhysAddr {
        assert!(
            self.contains_virt(vaddr),
            "[kmem] virtual address {:p} outside the direct mapping",
            vaddr
        );
        self.physical_base + (vaddr - self.virtual_base)
    }

    /// The page frame holding the memory behind a mapped virtual address.
    pub fn frame_of(&self, vaddr: VirtAddr) -> PageFrame {
        PageFrame(self.virt_to_phys(vaddr).0 >> PAGE_ALIGN_BITS)
    }

    /// Raw pointer to the start of a mapped frame.
    pub fn frame_ptr(&self, frame: PageFrame) -> *mut u8 {
        unsafe { self.phys_to_virt(frame.start_address()).as_mut_ptr() }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::PAGE_SIZE;

    fn fixture() -> DirectMapping {
        DirectMapping::new(VirtAddr(0xFFFF_8000_0000_0000), PhysAddr(0), 1 << 30)
    }

    #[test]
    fn roundtrip() {
        let dm = fixture();
        let phys = PhysAddr(0xCAFE);
        assert_eq!(dm.virt_to_phys(dm.phys_to_virt(phys)), phys);
    }

    #[test]
    fn frame_resolution() {
        let dm = fixture();
        let vaddr = dm.phys_to_virt(PhysAddr(5 * PAGE_SIZE + 123));
        assert_eq!(dm.frame_of(vaddr), PageFrame(5));
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_physical_address_panics() {
        let dm = fixture();
        dm.phys_to_virt(PhysAddr(1 << 30));
    }
}
