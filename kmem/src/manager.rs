//! The assembled memory manager: zone, slab tier and the mapping they use,
//! bundled into one explicit context object that the entry points thread
//! through the allocator stack.

use core::ptr::NonNull;

use bootinfo::MemoryRange;
use memunits::PhysRange;

use crate::boot::{BootError, Bootstrap, FrameLayout};
use crate::mapping::DirectMapping;
use crate::physical::buddy::Zone;
use crate::physical::{FrameAllocator, PageFrame};
use crate::slab::{
    AllocError, CacheError, CacheFlags, CacheRef, ObjectCtor, ObjectDtor, SlabAllocator,
};

/// The fully booted memory core.
pub struct MemoryManager {
    mapping: DirectMapping,
    zone: Zone,
    slabs: SlabAllocator,
}

// The manager owns all the raw pointers reachable from it exclusively;
// callers serialize access through a lock (see the `global` module).
unsafe impl Send for MemoryManager {}

impl MemoryManager {
    /// Run the whole boot sequence: bump heap, frame database, relocation,
    /// buddy seeding, slab bootstrap.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Bootstrap::new`].
    pub unsafe fn bootstrap(
        mapping: DirectMapping,
        heap_span: PhysRange,
        ranges: &[MemoryRange],
    ) -> Result<MemoryManager, BootError> {
        let mut boot = Bootstrap::new(mapping, heap_span);
        boot.create_frame_database(ranges)?;
        boot.relocate_frame_database()?;
        boot.seed_zone();
        boot.init_slab()?;
        Ok(boot.finish())
    }

    pub(crate) fn from_parts(
        mapping: DirectMapping,
        zone: Zone,
        slabs: SlabAllocator,
    ) -> MemoryManager {
        MemoryManager {
            mapping,
            zone,
            slabs,
        }
    }

    pub fn mapping(&self) -> &DirectMapping {
        &self.mapping
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn frame_layout(&self) -> FrameLayout {
        FrameLayout {
            present_pages: self.zone.present_pages(),
            free_pages: self.zone.free_pages(),
            managed: PhysRange::from_bounds(
                PageFrame(self.zone.start_frame()).start_address(),
                PageFrame(self.zone.start_frame() + self.zone.present_pages()).start_address(),
            ),
        }
    }

    /// Allocate a naturally aligned block of `1 << order` page frames.
    pub fn alloc_pages(&mut self, order: usize) -> Option<PageFrame> {
        self.zone.alloc_pages(order)
    }

    /// Free a block from [`MemoryManager::alloc_pages`].
    pub fn free_pages(&mut self, frame: PageFrame, order: usize) {
        FrameAllocator::free_pages(&mut self.zone, frame, order)
    }

    /// Create a named object cache, see [`SlabAllocator::create_cache`].
    pub fn create_cache(
        &mut self,
        name: &'static str,
        size: usize,
        align: usize,
        flags: CacheFlags,
        ctor: Option<ObjectCtor>,
        dtor: Option<ObjectDtor>,
    ) -> Result<CacheRef, CacheError> {
        self.slabs
            .create_cache(&mut self.zone, &self.mapping, name, size, align, flags, ctor, dtor)
    }

    pub fn cache_alloc(&mut self, cache: CacheRef) -> Result<NonNull<u8>, AllocError> {
        let object = self.slabs.alloc(cache, &mut self.zone, &self.mapping)?;
        Ok(unsafe { NonNull::new_unchecked(object) })
    }

    pub fn cache_zalloc(&mut self, cache: CacheRef) -> Result<NonNull<u8>, AllocError> {
        let object = self.slabs.zalloc(cache, &mut self.zone, &self.mapping)?;
        Ok(unsafe { NonNull::new_unchecked(object) })
    }

    pub fn cache_free(&mut self, cache: CacheRef, object: NonNull<u8>) {
        self.slabs
            .free(cache, object.as_ptr(), &mut self.zone, &self.mapping)
    }

    pub fn set_cache_free_limit(&mut self, cache: CacheRef, limit: usize) {
        self.slabs.set_free_limit(cache, limit)
    }

    /// Allocate `size` bytes from the general-purpose caches.
    pub fn kmalloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let object = self
            .slabs
            .kmalloc(&mut self.zone, &self.mapping, size)?;
        Ok(unsafe { NonNull::new_unchecked(object) })
    }

    /// Allocate `size` zeroed bytes from the general-purpose caches.
    pub fn kzalloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let object = self
            .slabs
            .kzalloc(&mut self.zone, &self.mapping, size)?;
        Ok(unsafe { NonNull::new_unchecked(object) })
    }

    /// Free a `kmalloc` allocation; the owning cache is found through the
    /// frame back-pointers.
    pub fn kfree(&mut self, object: NonNull<u8>) {
        self.slabs
            .kfree(&mut self.zone, &self.mapping, object.as_ptr())
    }

    /// The cache owning an allocated object, if the address is slab memory.
    pub fn cache_of(&self, object: NonNull<u8>) -> Option<CacheRef> {
        let frame = self
            .mapping
            .frame_of(memunits::VirtAddr(object.as_ptr() as usize));
        let index = frame.0 - self.zone.start_frame();
        self.zone
            .slab_owner(index)
            .map(|(cache, _, _)| CacheRef::from_ptr(cache))
    }

    /// The general cache that serves requests of `size` bytes.
    pub fn size_cache(&self, size: usize) -> Option<CacheRef> {
        self.slabs.size_cache_for(size)
    }
}
