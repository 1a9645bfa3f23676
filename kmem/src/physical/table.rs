//! The frame database: one descriptor per physical page frame.
//!
//! The database is created early, out of the boot heap, with every frame
//! reserved. Usable ranges from the boot report are then released, and before
//! the buddy allocator is seeded the whole table relocates itself into
//! frame-backed memory so that the boot heap can be thrown away.

use core::cmp;
use core::mem;
use core::ptr;

use bootinfo::MemoryRange;
use log::debug;
use memunits::{Alignable, VirtAddr, PAGE_ALIGN_BITS, PAGE_SIZE};

use crate::boot::BootError;
use crate::mapping::DirectMapping;
use crate::physical::bump::BootHeap;
use crate::physical::PageFrame;
use crate::slab::{Cache, SlabDesc};

/// Links threading a frame into the free list of its order while it heads a
/// buddy free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeLink {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Ownership of a page frame. A frame is in exactly one state at a time; the
/// buddy links and the slab back-pointers share storage, keyed by the
/// discriminant, so mixing them up is impossible by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Not available for allocation: firmware, device holes, the kernel
    /// image, or the frame database itself.
    Reserved,
    /// Usable memory that is on no free list: either handed out to a caller
    /// or the interior of a free buddy block.
    Untracked,
    /// Head of a free buddy block of `1 << order` frames.
    Free { order: usize, link: FreeLink },
    /// Part of a slab. The back-pointers resolve any object address to its
    /// cache and slab descriptor; `first` is the zone-relative index of the
    /// first frame of the slab's block.
    Slab {
        cache: *mut Cache,
        slab: *mut SlabDesc,
        first: usize,
    },
}

/// Descriptor of a single physical page frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub number: usize,
    pub ref_count: u32,
    pub state: FrameState,
}

/// The array of frame descriptors. Lives in raw memory (boot heap first,
/// later a reserved run of frames) because it exists before any real
/// allocator does.
pub struct FrameTable {
    table: *mut Frame,
    length: usize,
}

impl FrameTable {
    /// Compute the size of the table in bytes given the number of frames.
    pub fn required_size_bytes(frames: usize) -> usize {
        frames * mem::size_of::<Frame>()
    }

    /// Initialize a table for `length` frames at the given location, every
    /// frame starting out reserved.
    ///
    /// # Safety
    ///
    /// `addr` must point to at least `required_size_bytes(length)` bytes of
    /// mapped, exclusively owned memory.
    pub unsafe fn from_addr(addr: VirtAddr, length: usize) -> FrameTable {
        let table: *mut Frame = addr.as_mut_ptr();
        for number in 0..length {
            table.add(number).write(Frame {
                number,
                ref_count: 0,
                state: FrameState::Reserved,
            });
        }
        FrameTable { table, length }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn frame(&self, index: usize) -> &Frame {
        assert!(index < self.length, "[kmem] frame index {} out of bounds", index);
        unsafe { &*self.table.add(index) }
    }

    pub fn frame_mut(&mut self, index: usize) -> &mut Frame {
        assert!(index < self.length, "[kmem] frame index {} out of bounds", index);
        unsafe { &mut *self.table.add(index) }
    }

    /// Release a reserved frame into the pool of usable memory. Frames in any
    /// other state are left alone, overlapping report entries are harmless.
    pub(crate) fn mark_usable(&mut self, index: usize) {
        let frame = self.frame_mut(index);
        if frame.state == FrameState::Reserved {
            frame.state = FrameState::Untracked;
        }
    }

    /// Find `count` consecutive untracked frames at or above `from`.
    fn find_untracked_run(&self, from: usize, count: usize) -> Option<usize> {
        let mut run = 0;
        for index in from..self.length {
            if self.frame(index).state == FrameState::Untracked {
                run += 1;
                if run == count {
                    return Some(index + 1 - count);
                }
            } else {
                run = 0;
            }
        }
        None
    }
}

/// Build the frame database out of the boot heap: sized by the highest usable
/// address of the report, all frames reserved, then the reported usable
/// ranges released (rounded inward to whole frames).
pub fn create_frame_database(
    heap: &mut BootHeap,
    ranges: &[MemoryRange],
) -> Result<FrameTable, BootError> {
    let frames = bootinfo::frame_count(ranges);
    if frames == 0 {
        return Err(BootError::NoUsableMemory);
    }
    let bytes = FrameTable::required_size_bytes(frames);
    let storage = heap.alloc(bytes).ok_or(BootError::BootHeapExhausted)?;
    let mut table = unsafe { FrameTable::from_addr(VirtAddr(storage.as_ptr() as usize), frames) };
    for range in ranges.iter().filter(|r| r.is_usable()) {
        for index in range.frames_included() {
            if index < frames {
                table.mark_usable(index);
            }
        }
    }
    debug!("[kmem] frame database created: {} frames, {} bytes", frames, bytes);
    Ok(table)
}

/// Move the frame database out of the boot heap into frame-backed memory
/// found by scanning the table itself, then release every frame below
/// `low_boundary` back into the pool; the boot heap lived there and is dead
/// after this step.
pub fn relocate_frame_database(
    table: &mut FrameTable,
    heap: &mut BootHeap,
    mapping: &DirectMapping,
    low_boundary: PageFrame,
) -> Result<(), BootError> {
    let bytes = FrameTable::required_size_bytes(table.length());
    let frames_needed = bytes.align_up(PAGE_SIZE) >> PAGE_ALIGN_BITS;
    // the new home must sit above the boundary, everything below is released
    let first = table
        .find_untracked_run(low_boundary.0, frames_needed)
        .ok_or(BootError::OutOfMemory)?;
    let destination = mapping.frame_ptr(PageFrame(first)) as *mut Frame;
    unsafe {
        ptr::copy_nonoverlapping(table.table, destination, table.length());
    }
    let old = table.table as *mut u8;
    table.table = destination;
    for index in first..first + frames_needed {
        table.frame_mut(index).state = FrameState::Reserved;
    }
    heap.free(unsafe { ptr::NonNull::new_unchecked(old) });
    let boundary = cmp::min(low_boundary.0, table.length());
    for index in 0..boundary {
        let frame = table.frame_mut(index);
        if frame.state == FrameState::Reserved {
            frame.state = FrameState::Untracked;
        }
    }
    debug!(
        "[kmem] frame database relocated to frames {}..{}",
        first,
        first + frames_needed
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::TestArena;
    use bootinfo::MemoryRange;
    use memunits::PhysAddr;

    #[test]
    fn database_starts_reserved_and_clears_usable_ranges() {
        let arena = TestArena::new(FrameTable::required_size_bytes(16));
        let mut table = unsafe { FrameTable::from_addr(VirtAddr(arena.base_addr()), 16) };
        assert_eq!(table.length(), 16);
        for i in 0..16 {
            assert_eq!(table.frame(i).state, FrameState::Reserved);
            assert_eq!(table.frame(i).number, i);
        }
        table.mark_usable(3);
        assert_eq!(table.frame(3).state, FrameState::Untracked);
        // releasing twice is harmless
        table.mark_usable(3);
        assert_eq!(table.frame(3).state, FrameState::Untracked);
    }

    #[test]
    fn creation_rounds_report_ranges_inward() {
        let arena = TestArena::new(32 * PAGE_SIZE);
        let mut heap =
            unsafe { BootHeap::new(VirtAddr(arena.base_addr()), arena.size()) };
        let report = [
            MemoryRange::reserved(PhysAddr(0), PhysAddr(2 * PAGE_SIZE)),
            // covers frames 2..=4 only partially at the top
            MemoryRange::usable(PhysAddr(2 * PAGE_SIZE), PhysAddr(5 * PAGE_SIZE - 1)),
            MemoryRange::usable(PhysAddr(6 * PAGE_SIZE), PhysAddr(8 * PAGE_SIZE)),
        ];
        let table = create_frame_database(&mut heap, &report).unwrap();
        assert_eq!(table.length(), 8);
        let expect_untracked = [2_usize, 3, 6, 7];
        for i in 0..8 {
            let want = if expect_untracked.contains(&i) {
                FrameState::Untracked
            } else {
                FrameState::Reserved
            };
            assert_eq!(table.frame(i).state, want, "frame {}", i);
        }
    }

    #[test]
    fn creation_fails_without_usable_memory() {
        let arena = TestArena::new(4 * PAGE_SIZE);
        let mut heap =
            unsafe { BootHeap::new(VirtAddr(arena.base_addr()), arena.size()) };
        let report = [MemoryRange::reserved(PhysAddr(0), PhysAddr(4 * PAGE_SIZE))];
        match create_frame_database(&mut heap, &report) {
            Err(BootError::NoUsableMemory) => {}
            other => panic!("unexpected result: {:?}", other.map(|t| t.length())),
        }
    }

    #[test]
    fn relocation_moves_the_table_above_the_boundary() {
        // 64 frames; the boot heap occupies the first four
        let arena = TestArena::new(64 * PAGE_SIZE);
        let heap_frames = 4;
        let mapping = arena.mapping();
        let mut heap = unsafe {
            BootHeap::new(VirtAddr(arena.base_addr()), heap_frames * PAGE_SIZE)
        };
        let report = [
            MemoryRange::reserved(PhysAddr(0), PhysAddr(heap_frames * PAGE_SIZE)),
            MemoryRange::usable(
                PhysAddr(heap_frames * PAGE_SIZE),
                PhysAddr(64 * PAGE_SIZE),
            ),
        ];
        let mut table = create_frame_database(&mut heap, &report).unwrap();
        relocate_frame_database(&mut table, &mut heap, &mapping, PageFrame(heap_frames))
            .unwrap();

        let table_frames =
            FrameTable::required_size_bytes(64).align_up(PAGE_SIZE) >> PAGE_ALIGN_BITS;
        // the table now occupies a reserved run right above the boundary
        for i in heap_frames..heap_frames + table_frames {
            assert_eq!(table.frame(i).state, FrameState::Reserved, "frame {}", i);
        }
        // the old heap frames were released
        for i in 0..heap_frames {
            assert_eq!(table.frame(i).state, FrameState::Untracked, "frame {}", i);
        }
        // everything above the new home is still usable
        for i in heap_frames + table_frames..64 {
            assert_eq!(table.frame(i).state, FrameState::Untracked, "frame {}", i);
        }
        // descriptor contents survived the copy
        for i in 0..64 {
            assert_eq!(table.frame(i).number, i);
        }
    }
}
