//! Physical page frames and the allocators that hand them out.

use core::ops;

use memunits::{Alignable, PhysAddr, PAGE_ALIGN_BITS, PAGE_SIZE};

pub mod buddy;
pub mod bump;
pub mod table;

/// Number of a physical page frame, counted from the start.
/// The first page frame at physical address 0x0 has number zero.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone)]
pub struct PageFrame(pub usize);

impl PageFrame {
    /// Return the next page frame starting at or above the given physical address.
    pub fn next_above(addr: PhysAddr) -> PageFrame {
        PageFrame(addr.align_up(PAGE_SIZE).0 >> PAGE_ALIGN_BITS)
    }

    /// Return the page frame including the given physical address.
    pub fn including(addr: PhysAddr) -> PageFrame {
        PageFrame(addr.align_down(PAGE_SIZE).0 >> PAGE_ALIGN_BITS)
    }

    pub fn start_address(&self) -> PhysAddr {
        PhysAddr(self.0 * PAGE_SIZE)
    }

    pub fn end_address(&self) -> PhysAddr {
        PhysAddr(self.0 * PAGE_SIZE + PAGE_SIZE)
    }
}

impl ops::Add<usize> for PageFrame {
    type Output = PageFrame;

    fn add(self, rhs: usize) -> PageFrame {
        PageFrame(self.0 + rhs)
    }
}

impl ops::Sub<usize> for PageFrame {
    type Output = PageFrame;

    fn sub(self, rhs: usize) -> PageFrame {
        PageFrame(self.0 - rhs)
    }
}

/// Page-granular allocation surface of the buddy system. `order` selects the
/// block size: `1 << order` contiguous frames, naturally aligned.
pub trait FrameAllocator {
    /// Allocate a block of `1 << order` frames, returning its first frame.
    /// Returns `None` when no block of sufficient order is free.
    fn alloc_pages(&mut self, order: usize) -> Option<PageFrame>;

    /// Return a block previously obtained from [`FrameAllocator::alloc_pages`]
    /// with the same order.
    fn free_pages(&mut self, frame: PageFrame, order: usize);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_from_address() {
        assert_eq!(PageFrame::next_above(PhysAddr(0x4001)), PageFrame(5));
        assert_eq!(PageFrame::next_above(PhysAddr(0x4000)), PageFrame(4));
        assert_eq!(PageFrame::including(PhysAddr(0x4FFF)), PageFrame(4));
        assert_eq!(PageFrame(4).start_address(), PhysAddr(0x4000));
        assert_eq!(PageFrame(4).end_address(), PhysAddr(0x5000));
    }
}
