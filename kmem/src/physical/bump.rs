//! The bootstrap bump allocator.
//!
//! A linear byte allocator over a small span of low memory that serves the
//! handful of allocations needed before the buddy and slab tiers exist, most
//! importantly the frame database. It never coalesces; its only luxuries are
//! reusing freed blocks that happen to be large enough and retracting the
//! bump cursor when the youngest block is freed. Once boot completes the
//! whole span is released and the allocator is abandoned.

use core::mem;
use core::ptr::{self, NonNull};

use log::trace;
use memunits::{Alignable, VirtAddr};

/// Allocation granularity of the boot heap.
const BLOCK_ALIGN: usize = 8;

/// Header preceding every block handed out by the boot heap.
#[repr(C)]
struct BlockHeader {
    size: usize,
    freed: bool,
    next: *mut BlockHeader,
}

assert_eq_size!(boot_heap_header; BlockHeader, [usize; 3]);

pub struct BootHeap {
    start: usize,
    end: usize,
    cursor: usize,
    head: *mut BlockHeader,
    tail: *mut BlockHeader,
}

impl BootHeap {
    /// Create a boot heap over the given span of virtual memory.
    ///
    /// # Safety
    ///
    /// The span must be mapped, unused by anything else, and `base` must be
    /// aligned to at least 8 bytes.
    pub unsafe fn new(base: VirtAddr, size: usize) -> BootHeap {
        assert!(base.is_aligned(BLOCK_ALIGN));
        BootHeap {
            start: base.0,
            end: base.0 + size,
            cursor: base.0,
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    /// Allocate `size` bytes, rounded up to the next multiple of 8.
    /// Returns `None` when the span is exhausted; during boot that is fatal
    /// for the caller.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let size = size.align_up(BLOCK_ALIGN);
        // reuse an earlier freed block if one is large enough; no splitting,
        // the block keeps its original size
        unsafe {
            let mut block = self.head;
            while !block.is_null() {
                if (*block).freed && (*block).size >= size {
                    (*block).freed = false;
                    return Some(NonNull::new_unchecked(block.add(1) as *mut u8));
                }
                block = (*block).next;
            }
        }
        let total = mem::size_of::<BlockHeader>() + size;
        if self.cursor + total > self.end {
            return None;
        }
        let header = self.cursor as *mut BlockHeader;
        unsafe {
            header.write(BlockHeader {
                size,
                freed: false,
                next: ptr::null_mut(),
            });
            if self.head.is_null() {
                self.head = header;
            } else {
                (*self.tail).next = header;
            }
            self.tail = header;
            self.cursor += total;
            trace!("[kmem] boot heap alloc {} B, {} B left", size, self.remaining());
            Some(NonNull::new_unchecked(header.add(1) as *mut u8))
        }
    }

    /// Return a block obtained from [`BootHeap::alloc`]. Freeing the youngest
    /// block retracts the bump cursor, anything else only marks the block
    /// reusable.
    pub fn free(&mut self, block: NonNull<u8>) {
        let header = unsafe { (block.as_ptr() as *mut BlockHeader).sub(1) };
        let addr = header as usize;
        assert!(
            addr >= self.start && addr < self.cursor,
            "[kmem] boot heap freeing foreign pointer {:p}",
            block
        );
        unsafe {
            assert!(
                !(*header).freed,
                "[kmem] boot heap double free of {:p}",
                block
            );
            (*header).freed = true;
            if (*header).next.is_null() {
                self.cursor = addr;
                self.unlink_tail();
            }
        }
    }

    unsafe fn unlink_tail(&mut self) {
        if self.head == self.tail {
            self.head = ptr::null_mut();
            self.tail = ptr::null_mut();
            return;
        }
        let mut block = self.head;
        while (*block).next != self.tail {
            block = (*block).next;
        }
        (*block).next = ptr::null_mut();
        self.tail = block;
    }

    /// Bytes left between the bump cursor and the end of the span.
    pub fn remaining(&self) -> usize {
        self.end - self.cursor
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HEADER: usize = mem::size_of::<BlockHeader>();

    fn fixture(words: usize) -> (Vec<u64>, BootHeap) {
        let storage = vec![0_u64; words];
        let heap = unsafe { BootHeap::new(VirtAddr(storage.as_ptr() as usize), words * 8) };
        (storage, heap)
    }

    #[test]
    fn sizes_are_rounded_to_eight_bytes() {
        let (_storage, mut heap) = fixture(32);
        let before = heap.remaining();
        heap.alloc(1).unwrap();
        assert_eq!(before - heap.remaining(), HEADER + 8);
        heap.alloc(17).unwrap();
        assert_eq!(before - heap.remaining(), 2 * HEADER + 8 + 24);
    }

    #[test]
    fn exhaustion_returns_none() {
        let (_storage, mut heap) = fixture(8);
        // 64 bytes total, a header alone is 24
        assert!(heap.alloc(64).is_none());
        let a = heap.alloc(8);
        assert!(a.is_some());
        assert!(heap.alloc(64).is_none());
    }

    #[test]
    fn freed_blocks_are_reused_first_fit() {
        let (_storage, mut heap) = fixture(64);
        let a = heap.alloc(16).unwrap();
        let _b = heap.alloc(16).unwrap();
        let cursor_before = heap.remaining();
        heap.free(a);
        // a is not the youngest block, the cursor must not move
        assert_eq!(heap.remaining(), cursor_before);
        let c = heap.alloc(8).unwrap();
        assert_eq!(c, a, "freed block should be reused");
        assert_eq!(heap.remaining(), cursor_before);
    }

    #[test]
    fn freeing_the_youngest_block_retracts_the_cursor() {
        let (_storage, mut heap) = fixture(64);
        let _a = heap.alloc(16).unwrap();
        let before_b = heap.remaining();
        let b = heap.alloc(16).unwrap();
        heap.free(b);
        assert_eq!(heap.remaining(), before_b);
        // the retracted space can be allocated again from scratch
        let c = heap.alloc(16).unwrap();
        assert_eq!(c, b);
    }

    #[test]
    #[should_panic]
    fn double_free_panics() {
        let (_storage, mut heap) = fixture(32);
        let a = heap.alloc(16).unwrap();
        let _b = heap.alloc(8).unwrap();
        heap.free(a);
        heap.free(a);
    }
}
