//! Test support: a host-allocated arena standing in for physical memory.

use std::alloc::{alloc_zeroed, dealloc, Layout};

use bootinfo::MemoryRange;
use memunits::{Alignable, PhysAddr, PhysRange, VirtAddr};

use crate::manager::MemoryManager;
use crate::mapping::DirectMapping;
use crate::PAGE_SIZE;

/// A page-aligned block of host memory that tests treat as the machine's
/// physical memory, with physical address zero at its base.
pub struct TestArena {
    base: *mut u8,
    size: usize,
}

impl TestArena {
    pub fn new(size: usize) -> TestArena {
        let size = size.align_up(PAGE_SIZE);
        let layout = Layout::from_size_align(size, PAGE_SIZE).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "test arena allocation failed");
        TestArena { base, size }
    }

    pub fn base_addr(&self) -> usize {
        self.base as usize
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The identity-style mapping of the arena: physical 0 is the arena base.
    pub fn mapping(&self) -> DirectMapping {
        DirectMapping::new(VirtAddr(self.base as usize), PhysAddr(0), self.size)
    }
}

impl Drop for TestArena {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.size, PAGE_SIZE).unwrap();
        unsafe { dealloc(self.base, layout) };
    }
}

/// Boot a full memory manager over the arena. The first `heap_frames` frames
/// hold the bootstrap heap and are reported reserved, mirroring a kernel
/// whose image and boot heap occupy low memory; the rest is usable RAM.
pub fn boot_arena(arena: &TestArena, heap_frames: usize) -> MemoryManager {
    let heap_end = PhysAddr(heap_frames * PAGE_SIZE);
    let heap_span = PhysRange::from_bounds(PhysAddr(0), heap_end);
    let report = [
        MemoryRange::reserved(PhysAddr(0), heap_end),
        MemoryRange::usable(heap_end, PhysAddr(arena.size())),
    ];
    unsafe {
        MemoryManager::bootstrap(arena.mapping(), heap_span, &report)
            .expect("arena bootstrap failed")
    }
}
