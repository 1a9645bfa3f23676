//! The ladder of general-purpose caches behind `kmalloc`.

use core::mem;

use log::trace;
use memunits::VirtAddr;

use super::{AllocError, CacheError, CacheFlags, CacheRef, SlabAllocator};
use crate::mapping::DirectMapping;
use crate::physical::buddy::Zone;

/// Cache sizes served by `kmalloc`, ascending; a request is rounded up to
/// the first entry that fits.
pub(crate) const GENERAL_SIZES: [(usize, &str); 15] = [
    (32, "size-32"),
    (64, "size-64"),
    (96, "size-96"),
    (128, "size-128"),
    (192, "size-192"),
    (256, "size-256"),
    (512, "size-512"),
    (1024, "size-1024"),
    (2048, "size-2048"),
    (4096, "size-4096"),
    (8192, "size-8192"),
    (16384, "size-16384"),
    (32768, "size-32768"),
    (65536, "size-65536"),
    (131072, "size-131072"),
];

pub(crate) const NUM_GENERAL_SIZES: usize = GENERAL_SIZES.len();

/// Largest request `kmalloc` can serve.
pub const MAX_KMALLOC_SIZE: usize = 131072;

/// One rung of the ladder.
#[derive(Clone, Copy)]
pub(crate) struct SizeCache {
    pub size: usize,
    pub cache: CacheRef,
}

impl SlabAllocator {
    pub(crate) fn create_general_caches(
        &mut self,
        zone: &mut Zone,
        mapping: &DirectMapping,
    ) -> Result<(), CacheError> {
        for (slot, &(size, name)) in GENERAL_SIZES.iter().enumerate() {
            let cache = self.create_cache(
                zone,
                mapping,
                name,
                size,
                mem::align_of::<u64>(),
                CacheFlags::HWCACHE_ALIGN,
                None,
                None,
            )?;
            self.sizes[slot] = Some(SizeCache { size, cache });
        }
        Ok(())
    }

    /// The smallest general cache serving requests of `size` bytes.
    pub(crate) fn size_cache_for(&self, size: usize) -> Option<CacheRef> {
        self.sizes
            .iter()
            .flatten()
            .find(|entry| entry.size >= size)
            .map(|entry| entry.cache)
    }

    /// Allocate `size` bytes from the general caches.
    pub fn kmalloc(
        &mut self,
        zone: &mut Zone,
        mapping: &DirectMapping,
        size: usize,
    ) -> Result<*mut u8, AllocError> {
        let cache = self.size_cache_for(size).ok_or(AllocError::TooLarge)?;
        trace!("[kmem] kmalloc {} B from '{}'", size, cache.name());
        self.alloc(cache, zone, mapping)
    }

    /// Allocate `size` zeroed bytes from the general caches.
    pub fn kzalloc(
        &mut self,
        zone: &mut Zone,
        mapping: &DirectMapping,
        size: usize,
    ) -> Result<*mut u8, AllocError> {
        let cache = self.size_cache_for(size).ok_or(AllocError::TooLarge)?;
        self.zalloc(cache, zone, mapping)
    }

    /// Free a `kmalloc` allocation. The owning cache is recovered from the
    /// frame back-pointers, so only the address is needed.
    pub fn kfree(&mut self, zone: &mut Zone, mapping: &DirectMapping, object: *mut u8) {
        let index = mapping.frame_of(VirtAddr(object as usize)).0 - zone.start_frame();
        let (cache, _slab, _first) = match zone.slab_owner(index) {
            Some(found) => found,
            None => panic!("[kmem] kfree of {:p} which is not slab memory", object),
        };
        self.free(CacheRef::from_ptr(cache), object, zone, mapping);
    }
}
