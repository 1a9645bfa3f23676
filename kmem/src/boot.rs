//! Boot sequencing of the memory core.
//!
//! Allocators come up in a fixed order: only the bump heap exists at first,
//! then the frame database is built and relocated into frame-backed memory,
//! then the buddy free lists are seeded, and finally the slab tier is
//! bootstrapped. Each step names the stage it requires; calling out of order
//! is a kernel bug and panics.

use bootinfo::MemoryRange;
use log::debug;
use memunits::{PhysAddr, PhysRange};

use crate::manager::MemoryManager;
use crate::mapping::DirectMapping;
use crate::physical::buddy::Zone;
use crate::physical::bump::BootHeap;
use crate::physical::table::{self, FrameTable};
use crate::physical::PageFrame;
use crate::slab::{CacheError, SlabAllocator};

/// Progress of the boot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootStage {
    /// Only the bump heap works.
    BumpOnly,
    /// The frame database lives in frame-backed memory, the bump heap is dead.
    FramesRelocated,
    /// The buddy allocator serves page blocks.
    ZoneReady,
    /// The slab tier and `kmalloc` are live.
    SlabReady,
}

/// Fatal initialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// The boot report contains no usable frame.
    NoUsableMemory,
    /// The bump heap cannot hold the frame database.
    BootHeapExhausted,
    /// Not enough usable memory for a required boot allocation.
    OutOfMemory,
    /// The slab tier could not be brought up.
    Cache(CacheError),
}

/// Snapshot of the zone handed to the page-table installer.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub present_pages: usize,
    pub free_pages: usize,
    /// Physical span covered by the zone.
    pub managed: PhysRange,
}

/// Machine-dependent hook that builds the final page tables once physical
/// allocation is live.
pub trait PageTableInstaller {
    fn install(&mut self, layout: &FrameLayout);
}

/// Installer for environments that already run with a suitable mapping.
pub struct NoPaging;

impl PageTableInstaller for NoPaging {
    fn install(&mut self, _layout: &FrameLayout) {}
}

/// Drives the boot sequence step by step. [`MemoryManager::bootstrap`] runs
/// all steps in order; kernels that need to interleave other early work can
/// call them individually.
pub struct Bootstrap {
    stage: BootStage,
    mapping: DirectMapping,
    heap: BootHeap,
    low_boundary: PageFrame,
    frames: Option<FrameTable>,
    zone: Option<Zone>,
    slabs: Option<SlabAllocator>,
}

impl Bootstrap {
    /// Start the sequence with a bump heap over `heap_span`.
    ///
    /// # Safety
    ///
    /// `heap_span` must be mapped by `mapping` and otherwise unused. All
    /// memory the boot report later declares usable must be covered by the
    /// mapping as well.
    pub unsafe fn new(mapping: DirectMapping, heap_span: PhysRange) -> Bootstrap {
        let heap = BootHeap::new(mapping.phys_to_virt(heap_span.start()), heap_span.len());
        // everything below this frame is released once the heap dies
        let low_boundary = PageFrame::next_above(heap_span.end());
        Bootstrap {
            stage: BootStage::BumpOnly,
            mapping,
            heap,
            low_boundary,
            frames: None,
            zone: None,
            slabs: None,
        }
    }

    pub fn stage(&self) -> BootStage {
        self.stage
    }

    fn expect_stage(&self, wanted: BootStage, step: &str) {
        assert!(
            self.stage == wanted,
            "[kmem] boot step '{}' requires stage {:?} but the sequence is at {:?}",
            step,
            wanted,
            self.stage
        );
    }

    /// Build the frame database from the boot report, out of the bump heap.
    pub fn create_frame_database(&mut self, ranges: &[MemoryRange]) -> Result<(), BootError> {
        self.expect_stage(BootStage::BumpOnly, "create_frame_database");
        assert!(
            self.frames.is_none(),
            "[kmem] frame database already created"
        );
        self.frames = Some(table::create_frame_database(&mut self.heap, ranges)?);
        Ok(())
    }

    /// Move the frame database into frame-backed memory and release the low
    /// memory that held the bump heap.
    pub fn relocate_frame_database(&mut self) -> Result<(), BootError> {
        self.expect_stage(BootStage::BumpOnly, "relocate_frame_database");
        let frames = self
            .frames
            .as_mut()
            .expect("[kmem] frame database has not been created");
        table::relocate_frame_database(frames, &mut self.heap, &self.mapping, self.low_boundary)?;
        self.stage = BootStage::FramesRelocated;
        Ok(())
    }

    /// Seed the buddy free lists from the untracked frames.
    pub fn seed_zone(&mut self) {
        self.expect_stage(BootStage::FramesRelocated, "seed_zone");
        let mut zone = Zone::new(self.frames.take().unwrap(), 0);
        zone.seed_free_lists();
        self.zone = Some(zone);
        self.stage = BootStage::ZoneReady;
    }

    /// Snapshot of the zone for the page-table installer.
    pub fn frame_layout(&self) -> FrameLayout {
        let zone = self
            .zone
            .as_ref()
            .expect("[kmem] no zone before seed_zone");
        FrameLayout {
            present_pages: zone.present_pages(),
            free_pages: zone.free_pages(),
            managed: PhysRange::from_bounds(
                PageFrame(zone.start_frame()).start_address(),
                PhysAddr((zone.start_frame() + zone.present_pages()) << crate::PAGE_ALIGN_BITS),
            ),
        }
    }

    /// Let the machine layer build its final page tables. Allowed any time
    /// after the zone is ready.
    pub fn install_page_tables(&mut self, installer: &mut dyn PageTableInstaller) {
        assert!(
            self.stage >= BootStage::ZoneReady,
            "[kmem] page tables need a ready zone, sequence is at {:?}",
            self.stage
        );
        installer.install(&self.frame_layout());
    }

    /// Bootstrap the slab tier and the `kmalloc` ladder.
    pub fn init_slab(&mut self) -> Result<(), BootError> {
        self.expect_stage(BootStage::ZoneReady, "init_slab");
        let zone = self.zone.as_mut().unwrap();
        self.slabs = Some(SlabAllocator::init(zone, &self.mapping)?);
        self.stage = BootStage::SlabReady;
        Ok(())
    }

    /// Finish the sequence. Whatever capacity the bump heap still had is
    /// abandoned with it.
    pub fn finish(self) -> MemoryManager {
        assert!(
            self.stage == BootStage::SlabReady,
            "[kmem] boot sequence finished at stage {:?}",
            self.stage
        );
        debug!("[kmem] boot sequence complete");
        MemoryManager::from_parts(self.mapping, self.zone.unwrap(), self.slabs.unwrap())
    }
}
