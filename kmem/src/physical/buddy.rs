//! The buddy allocator, handing out naturally aligned power-of-two runs of
//! page frames from a zone.
//!
//! Free blocks of `1 << order` frames are kept on one intrusive list per
//! order, threaded through the frame descriptors themselves. Allocation
//! splits larger blocks downward; freeing coalesces with the buddy block
//! (index XOR block size) upward for as long as the buddy is free at the same
//! order and inside the zone.

use core::cmp;
use core::mem;

use log::{debug, trace};

use crate::physical::table::{Frame, FrameState, FrameTable, FreeLink};
use crate::physical::{FrameAllocator, PageFrame};
use crate::slab::{Cache, SlabDesc};
use crate::BUDDY_ORDERS;

/// Watermarks reserved for a future reclaim path; nothing consumes them yet.
pub const ZONE_PAGES_MIN: usize = 10;
pub const ZONE_PAGES_LOW: usize = 20;

/// Free blocks of one order: list head plus block count.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeArea {
    head: Option<usize>,
    nr_free: usize,
}

impl FreeArea {
    pub fn blocks(&self) -> usize {
        self.nr_free
    }
}

/// A contiguous span of physical memory managed as one allocation pool.
pub struct Zone {
    frames: FrameTable,
    start_frame: usize,
    present_pages: usize,
    free_pages: usize,
    pages_min: usize,
    pages_low: usize,
    free_area: [FreeArea; BUDDY_ORDERS],
}

impl Zone {
    /// Wrap a frame table into a zone with empty free lists; call
    /// [`Zone::seed_free_lists`] to make its untracked memory allocatable.
    pub fn new(frames: FrameTable, start_frame: usize) -> Zone {
        let present_pages = frames.length();
        Zone {
            frames,
            start_frame,
            present_pages,
            free_pages: 0,
            pages_min: ZONE_PAGES_MIN,
            pages_low: ZONE_PAGES_LOW,
            free_area: [FreeArea::default(); BUDDY_ORDERS],
        }
    }

    pub fn start_frame(&self) -> usize {
        self.start_frame
    }

    pub fn present_pages(&self) -> usize {
        self.present_pages
    }

    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    pub fn pages_min(&self) -> usize {
        self.pages_min
    }

    pub fn pages_low(&self) -> usize {
        self.pages_low
    }

    /// Number of free blocks per order, mostly for diagnostics.
    pub fn free_area_counts(&self) -> [usize; BUDDY_ORDERS] {
        let mut counts = [0; BUDDY_ORDERS];
        for (count, area) in counts.iter_mut().zip(self.free_area.iter()) {
            *count = area.blocks();
        }
        counts
    }

    pub fn frame(&self, index: usize) -> &Frame {
        self.frames.frame(index)
    }

    fn index_of(&self, frame: PageFrame) -> usize {
        assert!(
            frame.0 >= self.start_frame,
            "[kmem] frame {:?} below the zone",
            frame
        );
        frame.0 - self.start_frame
    }

    /// The free-list links of a frame that must currently head a free block
    /// of the given order.
    fn link_mut(&mut self, index: usize, order: usize) -> &mut FreeLink {
        match self.frames.frame(index).state {
            FrameState::Free { order: found, .. } if found == order => {}
            ref other => panic!(
                "[kmem] frame {} expected free at order {}, found {:?}",
                index, order, other
            ),
        }
        match self.frames.frame_mut(index).state {
            FrameState::Free { ref mut link, .. } => link,
            _ => unreachable!(),
        }
    }

    fn push_free(&mut self, index: usize, order: usize) {
        debug_assert!(order < BUDDY_ORDERS);
        let old_head = self.free_area[order].head;
        {
            let frame = self.frames.frame_mut(index);
            match frame.state {
                FrameState::Untracked => {}
                ref other => panic!(
                    "[kmem] frame {} cannot join a free list from state {:?}",
                    index, other
                ),
            }
            frame.state = FrameState::Free {
                order,
                link: FreeLink {
                    prev: None,
                    next: old_head,
                },
            };
        }
        if let Some(next) = old_head {
            self.link_mut(next, order).prev = Some(index);
        }
        self.free_area[order].head = Some(index);
        self.free_area[order].nr_free += 1;
    }

    fn remove_free(&mut self, index: usize, order: usize) {
        let link = *self.link_mut(index, order);
        match link.prev {
            Some(prev) => self.link_mut(prev, order).next = link.next,
            None => {
                debug_assert_eq!(self.free_area[order].head, Some(index));
                self.free_area[order].head = link.next;
            }
        }
        if let Some(next) = link.next {
            self.link_mut(next, order).prev = link.prev;
        }
        self.frames.frame_mut(index).state = FrameState::Untracked;
        self.free_area[order].nr_free -= 1;
    }

    /// Allocate a block of `1 << order` frames. Scans the free areas upward
    /// from the requested order and splits any surplus back onto the lower
    /// free lists, so the returned block is exact.
    pub fn allocate_block(&mut self, order: usize) -> Option<PageFrame> {
        assert!(
            order < BUDDY_ORDERS,
            "[kmem] order {} beyond the largest buddy group",
            order
        );
        let mut current = order;
        while current < BUDDY_ORDERS && self.free_area[current].head.is_none() {
            current += 1;
        }
        if current == BUDDY_ORDERS {
            return None;
        }
        let index = self.free_area[current].head.unwrap();
        self.remove_free(index, current);
        self.free_pages -= 1 << order;
        while current > order {
            current -= 1;
            // the upper half becomes a free block of the next lower order
            self.push_free(index + (1 << current), current);
        }
        self.frames.frame_mut(index).ref_count = 1;
        trace!("[kmem] allocated order-{} block at frame {}", order, index);
        Some(PageFrame(self.start_frame + index))
    }

    /// Free a block of `1 << order` frames starting at `frame`, coalescing
    /// with free buddies upward as far as possible.
    pub fn free_block(&mut self, frame: PageFrame, order: usize) {
        assert!(
            order < BUDDY_ORDERS,
            "[kmem] order {} beyond the largest buddy group",
            order
        );
        let mut index = self.index_of(frame);
        assert!(
            index + (1 << order) <= self.frames.length(),
            "[kmem] order-{} block at frame {} exceeds the zone",
            order,
            index
        );
        match self.frames.frame(index).state {
            FrameState::Untracked => {}
            FrameState::Free { .. } => panic!("[kmem] double free of frame {}", index),
            ref other => panic!("[kmem] frame {} freed while in state {:?}", index, other),
        }
        self.frames.frame_mut(index).ref_count = 0;
        self.free_pages += 1 << order;
        let mut order = order;
        while order < BUDDY_ORDERS - 1 {
            let buddy = index ^ (1 << order);
            if buddy + (1 << order) > self.frames.length() {
                break;
            }
            let buddy_is_free = match self.frames.frame(buddy).state {
                FrameState::Free { order: found, .. } => found == order,
                _ => false,
            };
            if !buddy_is_free {
                break;
            }
            self.remove_free(buddy, order);
            index &= buddy;
            order += 1;
        }
        self.push_free(index, order);
    }

    /// Seed the free lists from the untracked frames of the zone: every
    /// maximal run decomposes into the largest blocks that are both naturally
    /// aligned and no longer than the rest of the run.
    pub fn seed_free_lists(&mut self) {
        let length = self.frames.length();
        let mut index = 0;
        while index < length {
            if self.frames.frame(index).state != FrameState::Untracked {
                index += 1;
                continue;
            }
            let run_start = index;
            while index < length && self.frames.frame(index).state == FrameState::Untracked {
                index += 1;
            }
            self.seed_run(run_start, index);
        }
        debug!(
            "[kmem] buddy seeded: {} of {} pages free",
            self.free_pages, self.present_pages
        );
    }

    fn seed_run(&mut self, start: usize, end: usize) {
        let mut pos = start;
        while pos < end {
            let remaining = end - pos;
            let size_order =
                mem::size_of::<usize>() * 8 - 1 - remaining.leading_zeros() as usize;
            let align_order = if pos == 0 {
                BUDDY_ORDERS - 1
            } else {
                pos.trailing_zeros() as usize
            };
            let order = cmp::min(cmp::min(size_order, align_order), BUDDY_ORDERS - 1);
            self.free_block(PageFrame(self.start_frame + pos), order);
            pos += 1 << order;
        }
    }

    /// Stamp an allocated block as slab-owned, storing the back-pointers that
    /// later resolve object addresses to their cache.
    pub(crate) fn set_slab_run(
        &mut self,
        first: usize,
        order: usize,
        cache: *mut Cache,
        slab: *mut SlabDesc,
    ) {
        for index in first..first + (1 << order) {
            let frame = self.frames.frame_mut(index);
            match frame.state {
                FrameState::Untracked => {
                    frame.state = FrameState::Slab { cache, slab, first }
                }
                ref other => panic!(
                    "[kmem] frame {} cannot become slab-owned from state {:?}",
                    index, other
                ),
            }
        }
    }

    /// Drop the slab stamp from a block about to be returned to the buddy
    /// allocator.
    pub(crate) fn clear_slab_run(&mut self, first: usize, order: usize) {
        for index in first..first + (1 << order) {
            let frame = self.frames.frame_mut(index);
            match frame.state {
                FrameState::Slab { .. } => frame.state = FrameState::Untracked,
                ref other => panic!(
                    "[kmem] frame {} is not slab-owned but {:?}",
                    index, other
                ),
            }
        }
    }

    /// Resolve a zone-relative frame index to its slab back-pointers, if the
    /// frame is slab-owned.
    pub(crate) fn slab_owner(&self, index: usize) -> Option<(*mut Cache, *mut SlabDesc, usize)> {
        if index >= self.frames.length() {
            return None;
        }
        match self.frames.frame(index).state {
            FrameState::Slab { cache, slab, first } => Some((cache, slab, first)),
            _ => None,
        }
    }
}

impl FrameAllocator for Zone {
    fn alloc_pages(&mut self, order: usize) -> Option<PageFrame> {
        self.allocate_block(order)
    }

    fn free_pages(&mut self, frame: PageFrame, order: usize) {
        self.free_block(frame, order)
    }
}
