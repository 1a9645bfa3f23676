//! The slab allocator: named caches of fixed-size objects carved out of
//! buddy blocks.
//!
//! Each cache keeps three lists of slabs (full, partially used, empty). A
//! slab is one naturally aligned block of `1 << gfporder` frames whose frames
//! are stamped with back-pointers to the owning cache and slab descriptor, so
//! freeing never needs more than the object address. Slab starts rotate
//! through the leftover bytes in cache-line steps ("colouring") to spread
//! objects of different slabs over distinct cache lines.
//!
//! The descriptor of a slab normally lives at the head of the slab itself;
//! caches of large objects keep it off-slab in one of the general-purpose
//! caches instead. The cache descriptors themselves come from a dedicated
//! cache of caches, which bootstraps itself out of its own first slab.

use core::cmp;
use core::mem;
use core::ptr::{self, NonNull};

use log::{debug, trace};
use memunits::{Alignable, VirtAddr, PAGE_SIZE};

use crate::boot::BootError;
use crate::mapping::DirectMapping;
use crate::physical::buddy::Zone;
use crate::physical::PageFrame;
use crate::{BUDDY_ORDERS, CACHE_LINE_SIZE};

mod freelist;
mod list;
mod sizes;

pub use freelist::FreeList;
pub use list::SlabList;
pub use sizes::MAX_KMALLOC_SIZE;

pub(crate) use sizes::{SizeCache, GENERAL_SIZES, NUM_GENERAL_SIZES};

/// Minimum object alignment.
pub const BYTES_PER_WORD: usize = mem::size_of::<usize>();

/// Largest buddy order a single slab may span.
pub const MAX_SLAB_ORDER: usize = BUDDY_ORDERS - 1;

bitflags! {
    pub struct CacheFlags: u32 {
        /// Align objects to cache-line boundaries (shrunk for tiny objects
        /// that would waste more than half a line).
        const HWCACHE_ALIGN = 1 << 0;
        /// Keep the slab descriptor outside the slab, in a general-purpose
        /// cache.
        const OFF_SLAB = 1 << 1;
    }
}

/// Called once per object slot when a slab is created.
pub type ObjectCtor = fn(*mut u8);
/// Called once per object slot when a slab is destroyed.
pub type ObjectDtor = fn(*mut u8);

/// Allocation failure of the object tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The buddy allocator could not back another slab.
    OutOfMemory,
    /// The request exceeds the largest general-purpose cache.
    TooLarge,
}

/// Failure to create a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// No descriptor could be allocated.
    OutOfMemory,
    /// Not even a maximum-order slab fits a single object.
    ObjectTooLarge,
    /// An off-slab cache was requested before the general caches exist.
    NoDescriptorCache,
}

/// Descriptor of one slab. Lives either at the head of the slab's own memory
/// or in a general-purpose cache (off-slab).
#[repr(C)]
pub struct SlabDesc {
    pub(crate) prev: *mut SlabDesc,
    pub(crate) next: *mut SlabDesc,
    /// Offset of the first object from the start of the slab's block.
    pub(crate) colour_off: usize,
    /// Address of the first object.
    pub(crate) s_mem: *mut u8,
    /// Number of objects currently handed out.
    pub(crate) inuse: usize,
    pub(crate) free: FreeList,
}

/// Descriptor of an object cache. Cache descriptors are allocated from the
/// cache of caches and are never moved or released.
#[repr(C)]
pub struct Cache {
    name: &'static str,
    /// Final object size including alignment padding.
    obj_size: usize,
    /// Objects per slab.
    num: usize,
    /// Buddy order of each slab's block.
    gfporder: usize,
    flags: CacheFlags,
    /// Number of distinct colour offsets.
    colour: usize,
    /// Colour granularity in bytes.
    colour_off: usize,
    /// Colour to use for the next slab.
    colour_next: usize,
    /// Bytes taken by an on-slab descriptor, zero when off-slab.
    slab_size: usize,
    /// Keep at most this many free objects before empty slabs are returned
    /// to the buddy allocator.
    free_limit: usize,
    /// Free objects across all slabs of the cache.
    free_objects: usize,
    full: SlabList,
    partial: SlabList,
    free: SlabList,
    ctor: Option<ObjectCtor>,
    dtor: Option<ObjectDtor>,
    /// Where off-slab descriptors are allocated from.
    desc_cache: Option<CacheRef>,
}

/// Handle to a cache descriptor. Valid for the lifetime of the allocator
/// that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRef(NonNull<Cache>);

impl CacheRef {
    pub(crate) fn from_ptr(cache: *mut Cache) -> CacheRef {
        match NonNull::new(cache) {
            Some(p) => CacheRef(p),
            None => panic!("[kmem] null cache descriptor"),
        }
    }

    pub(crate) fn as_ptr(self) -> *mut Cache {
        self.0.as_ptr()
    }

    pub fn name(self) -> &'static str {
        unsafe { (*self.as_ptr()).name }
    }

    pub fn object_size(self) -> usize {
        unsafe { (*self.as_ptr()).obj_size }
    }

    pub fn objects_per_slab(self) -> usize {
        unsafe { (*self.as_ptr()).num }
    }

    pub fn order(self) -> usize {
        unsafe { (*self.as_ptr()).gfporder }
    }

    pub fn colours(self) -> usize {
        unsafe { (*self.as_ptr()).colour }
    }

    pub fn free_objects(self) -> usize {
        unsafe { (*self.as_ptr()).free_objects }
    }

    /// Slabs on the (full, partial, free) lists.
    pub fn slab_counts(self) -> (usize, usize, usize) {
        unsafe {
            let cache = &*self.as_ptr();
            (cache.full.len(), cache.partial.len(), cache.free.len())
        }
    }
}

/// How many objects of `obj_size` fit into a block of `1 << order` frames,
/// and how many bytes are left over for colouring. On-slab caches lose the
/// aligned descriptor footprint first.
pub fn cache_estimate(
    order: usize,
    obj_size: usize,
    align: usize,
    flags: CacheFlags,
) -> (usize, usize) {
    let total = PAGE_SIZE << order;
    if flags.contains(CacheFlags::OFF_SLAB) {
        let num = total / obj_size;
        (num, total - num * obj_size)
    } else {
        let mgmt = mem::size_of::<SlabDesc>().align_up(align);
        if total < mgmt + obj_size {
            return (0, total);
        }
        let num = (total - mgmt) / obj_size;
        (num, total - mgmt - num * obj_size)
    }
}

/// Smallest order whose block fits at least one object, with the resulting
/// geometry.
fn cache_geometry(
    obj_size: usize,
    align: usize,
    flags: CacheFlags,
) -> Result<(usize, usize, usize), CacheError> {
    for order in 0..=MAX_SLAB_ORDER {
        let (num, left_over) = cache_estimate(order, obj_size, align, flags);
        if num > 0 {
            return Ok((order, num, left_over));
        }
    }
    Err(CacheError::ObjectTooLarge)
}

/// Extend a cache by one slab. The new slab goes onto the free list.
unsafe fn grow_cache(
    cache: *mut Cache,
    zone: &mut Zone,
    mapping: &DirectMapping,
) -> Result<(), AllocError> {
    let colour_offset = {
        let colours = cmp::max((*cache).colour, 1);
        let offset = (*cache).colour_next * (*cache).colour_off;
        (*cache).colour_next = ((*cache).colour_next + 1) % colours;
        offset
    };
    let order = (*cache).gfporder;
    let block = zone.allocate_block(order).ok_or(AllocError::OutOfMemory)?;
    let first = block.0 - zone.start_frame();
    let base = mapping.frame_ptr(block);

    let slab: *mut SlabDesc;
    let objects_offset;
    if let Some(desc_cache) = (*cache).desc_cache {
        match alloc_object(desc_cache.as_ptr(), zone, mapping) {
            Ok(p) => {
                slab = p as *mut SlabDesc;
                objects_offset = colour_offset;
            }
            Err(err) => {
                zone.free_block(block, order);
                return Err(err);
            }
        }
    } else {
        slab = base.add(colour_offset) as *mut SlabDesc;
        objects_offset = colour_offset + (*cache).slab_size;
    }
    slab.write(SlabDesc {
        prev: ptr::null_mut(),
        next: ptr::null_mut(),
        colour_off: objects_offset,
        s_mem: base.add(objects_offset),
        inuse: 0,
        free: FreeList::new(),
    });
    zone.set_slab_run(first, order, cache, slab);

    let num = (*cache).num;
    let obj_size = (*cache).obj_size;
    if let Some(ctor) = (*cache).ctor {
        for i in 0..num {
            ctor((*slab).s_mem.add(i * obj_size));
        }
    }
    // thread the free list from the highest object down, so allocation walks
    // the slab in address order
    for i in (0..num).rev() {
        (*slab).free.push((*slab).s_mem.add(i * obj_size), obj_size);
    }
    (*cache).free.push_back(slab);
    (*cache).free_objects += num;
    trace!(
        "[kmem] cache '{}' grew an order-{} slab at colour offset {}",
        (*cache).name,
        order,
        colour_offset
    );
    Ok(())
}

/// Allocate one object: partial slabs first, then free slabs, growing the
/// cache only when both lists are empty.
unsafe fn alloc_object(
    cache: *mut Cache,
    zone: &mut Zone,
    mapping: &DirectMapping,
) -> Result<*mut u8, AllocError> {
    let mut slab = (*cache).partial.head();
    if slab.is_none() {
        if let Some(free_slab) = (*cache).free.pop_front() {
            (*cache).partial.push_front(free_slab);
            slab = Some(free_slab);
        }
    }
    let slab = match slab {
        Some(slab) => slab,
        None => {
            grow_cache(cache, zone, mapping)?;
            let grown = (*cache)
                .free
                .pop_front()
                .expect("[kmem] grown cache has no free slab");
            (*cache).partial.push_front(grown);
            grown
        }
    };
    let object = (*slab)
        .free
        .pop((*cache).obj_size)
        .expect("[kmem] slab on the partial list has no free object");
    (*slab).inuse += 1;
    (*cache).free_objects -= 1;
    if (*slab).free.is_empty() {
        (*cache).partial.remove(slab);
        (*cache).full.push_back(slab);
    }
    Ok(object)
}

/// Return an object to its slab, updating the list memberships and shrinking
/// the cache when it holds more free objects than its limit allows.
unsafe fn free_object(
    cache: *mut Cache,
    object: *mut u8,
    zone: &mut Zone,
    mapping: &DirectMapping,
) {
    let index = mapping.frame_of(VirtAddr(object as usize)).0 - zone.start_frame();
    let (owner, slab, _first) = match zone.slab_owner(index) {
        Some(found) => found,
        None => panic!("[kmem] freeing {:p} which is not slab memory", object),
    };
    assert!(
        owner == cache,
        "[kmem] object {:p} freed to cache '{}' but owned by '{}'",
        object,
        (*cache).name,
        (*owner).name
    );
    assert!((*slab).inuse > 0, "[kmem] double free of object {:p}", object);
    let was_full = (*slab).free.is_empty();
    (*slab).free.push(object, (*cache).obj_size);
    (*slab).inuse -= 1;
    (*cache).free_objects += 1;
    if was_full {
        (*cache).full.remove(slab);
        (*cache).partial.push_back(slab);
    }
    if (*slab).inuse == 0 {
        (*cache).partial.remove(slab);
        if (*cache).free_objects > (*cache).free_limit {
            (*cache).free_objects -= (*cache).num;
            destroy_slab(cache, slab, zone, mapping);
        } else {
            (*cache).free.push_back(slab);
        }
    }
}

/// Tear down an empty slab: run destructors, unstamp the frames and return
/// the block to the buddy allocator.
unsafe fn destroy_slab(
    cache: *mut Cache,
    slab: *mut SlabDesc,
    zone: &mut Zone,
    mapping: &DirectMapping,
) {
    let num = (*cache).num;
    let obj_size = (*cache).obj_size;
    let order = (*cache).gfporder;
    if let Some(dtor) = (*cache).dtor {
        for i in 0..num {
            dtor((*slab).s_mem.add(i * obj_size));
        }
    }
    let base = (*slab).s_mem.sub((*slab).colour_off);
    let first = mapping.frame_of(VirtAddr(base as usize)).0 - zone.start_frame();
    zone.clear_slab_run(first, order);
    zone.free_block(PageFrame(zone.start_frame() + first), order);
    trace!("[kmem] cache '{}' released an order-{} slab", (*cache).name, order);
    if let Some(desc_cache) = (*cache).desc_cache {
        free_object(desc_cache.as_ptr(), slab as *mut u8, zone, mapping);
    }
}

/// Create the cache of caches. Its descriptor is built on the stack, used to
/// grow the first slab, and then moved into the first object of that slab;
/// the slab's frames are restamped to point at the final location.
unsafe fn bootstrap_cache_cache(
    zone: &mut Zone,
    mapping: &DirectMapping,
) -> Result<CacheRef, BootError> {
    let obj_size = mem::size_of::<Cache>()
        .align_up(BYTES_PER_WORD)
        .align_up(CACHE_LINE_SIZE);
    let (gfporder, num, left_over) =
        cache_geometry(obj_size, CACHE_LINE_SIZE, CacheFlags::empty())
            .map_err(BootError::Cache)?;
    let mut boot = Cache {
        name: "cache-cache",
        obj_size,
        num,
        gfporder,
        flags: CacheFlags::empty(),
        colour: left_over / CACHE_LINE_SIZE,
        colour_off: CACHE_LINE_SIZE,
        colour_next: 0,
        slab_size: mem::size_of::<SlabDesc>().align_up(CACHE_LINE_SIZE),
        free_limit: num,
        free_objects: 0,
        full: SlabList::new(),
        partial: SlabList::new(),
        free: SlabList::new(),
        ctor: None,
        dtor: None,
        desc_cache: None,
    };
    grow_cache(&mut boot, zone, mapping).map_err(|_| BootError::OutOfMemory)?;
    let home = alloc_object(&mut boot, zone, mapping)
        .map_err(|_| BootError::OutOfMemory)? as *mut Cache;
    let slab = boot
        .partial
        .head()
        .expect("[kmem] bootstrap slab is not partial");
    ptr::write(home, boot);
    // the frames still point at the stack copy of the descriptor
    let base = (*slab).s_mem.sub((*slab).colour_off);
    let first = mapping.frame_of(VirtAddr(base as usize)).0 - zone.start_frame();
    zone.clear_slab_run(first, (*home).gfporder);
    zone.set_slab_run(first, (*home).gfporder, home, slab);
    debug!(
        "[kmem] cache of caches bootstrapped: {} descriptors per slab",
        (*home).num
    );
    Ok(CacheRef::from_ptr(home))
}

/// The object tier: the cache of caches plus the general-purpose size ladder
/// behind `kmalloc`. All operations additionally take the zone backing the
/// caches and the mapping used to reach slab memory.
pub struct SlabAllocator {
    cache_cache: CacheRef,
    sizes: [Option<SizeCache>; NUM_GENERAL_SIZES],
}

impl SlabAllocator {
    /// Bring up the object tier on a seeded zone.
    pub(crate) fn init(
        zone: &mut Zone,
        mapping: &DirectMapping,
    ) -> Result<SlabAllocator, BootError> {
        let cache_cache = unsafe { bootstrap_cache_cache(zone, mapping)? };
        let mut slabs = SlabAllocator {
            cache_cache,
            sizes: [None; NUM_GENERAL_SIZES],
        };
        slabs
            .create_general_caches(zone, mapping)
            .map_err(BootError::Cache)?;
        debug!(
            "[kmem] slab allocator ready: {} general caches",
            GENERAL_SIZES.len()
        );
        Ok(slabs)
    }

    pub fn cache_cache(&self) -> CacheRef {
        self.cache_cache
    }

    /// Create a named object cache. `align` of zero means the default word
    /// alignment; the hardware-cache flag raises it to (a fraction of) the
    /// cache line size.
    pub fn create_cache(
        &mut self,
        zone: &mut Zone,
        mapping: &DirectMapping,
        name: &'static str,
        size: usize,
        align: usize,
        flags: CacheFlags,
        ctor: Option<ObjectCtor>,
        dtor: Option<ObjectDtor>,
    ) -> Result<CacheRef, CacheError> {
        let mut obj_size = size.align_up(BYTES_PER_WORD);
        let mut ralign = if flags.contains(CacheFlags::HWCACHE_ALIGN) {
            // an object much smaller than a cache line must not waste the
            // rest of it
            let mut line = CACHE_LINE_SIZE;
            while obj_size <= line / 2 {
                line /= 2;
            }
            line
        } else {
            BYTES_PER_WORD
        };
        if ralign < align {
            ralign = align;
        }
        obj_size = obj_size.align_up(ralign);

        let (gfporder, num, left_over) = cache_geometry(obj_size, ralign, flags)?;
        let desc_cache = if flags.contains(CacheFlags::OFF_SLAB) {
            let needed = mem::size_of::<SlabDesc>();
            Some(
                self.size_cache_for(needed)
                    .ok_or(CacheError::NoDescriptorCache)?,
            )
        } else {
            None
        };
        let colour_off = cmp::max(CACHE_LINE_SIZE, ralign);

        let descriptor = unsafe { alloc_object(self.cache_cache.as_ptr(), zone, mapping) }
            .map_err(|_| CacheError::OutOfMemory)? as *mut Cache;
        unsafe {
            descriptor.write(Cache {
                name,
                obj_size,
                num,
                gfporder,
                flags,
                colour: left_over / colour_off,
                colour_off,
                colour_next: 0,
                slab_size: if desc_cache.is_some() {
                    0
                } else {
                    mem::size_of::<SlabDesc>().align_up(ralign)
                },
                free_limit: num,
                free_objects: 0,
                full: SlabList::new(),
                partial: SlabList::new(),
                free: SlabList::new(),
                ctor,
                dtor,
                desc_cache,
            });
        }
        debug!(
            "[kmem] cache '{}': {} B objects, order {}, {} per slab, {} colours",
            name,
            obj_size,
            gfporder,
            num,
            left_over / colour_off
        );
        Ok(CacheRef::from_ptr(descriptor))
    }

    /// Allocate one object from a cache.
    pub fn alloc(
        &mut self,
        cache: CacheRef,
        zone: &mut Zone,
        mapping: &DirectMapping,
    ) -> Result<*mut u8, AllocError> {
        unsafe { alloc_object(cache.as_ptr(), zone, mapping) }
    }

    /// Allocate one zeroed object from a cache.
    pub fn zalloc(
        &mut self,
        cache: CacheRef,
        zone: &mut Zone,
        mapping: &DirectMapping,
    ) -> Result<*mut u8, AllocError> {
        let object = self.alloc(cache, zone, mapping)?;
        unsafe {
            ptr::write_bytes(object, 0, cache.object_size());
        }
        Ok(object)
    }

    /// Return an object to the cache it was allocated from. Panics when
    /// `object` is not slab memory or belongs to a different cache.
    pub fn free(
        &mut self,
        cache: CacheRef,
        object: *mut u8,
        zone: &mut Zone,
        mapping: &DirectMapping,
    ) {
        unsafe { free_object(cache.as_ptr(), object, zone, mapping) }
    }

    /// Adjust how many free objects a cache may retain before empty slabs
    /// are handed back to the buddy allocator.
    pub fn set_free_limit(&mut self, cache: CacheRef, limit: usize) {
        unsafe {
            (*cache.as_ptr()).free_limit = limit;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{boot_arena, TestArena};
    use core::sync::atomic::{AtomicUsize, Ordering};

    const ARENA_SIZE: usize = 16 << 20;
    const HEAP_FRAMES: usize = 64;

    #[test]
    fn estimate_accounts_for_the_descriptor() {
        let desc = mem::size_of::<SlabDesc>().align_up(32);
        let (num, left_over) = cache_estimate(0, 64, 32, CacheFlags::empty());
        assert_eq!(num, (PAGE_SIZE - desc) / 64);
        assert_eq!(left_over, PAGE_SIZE - desc - num * 64);

        let (num, left_over) = cache_estimate(0, 64, 32, CacheFlags::OFF_SLAB);
        assert_eq!(num, PAGE_SIZE / 64);
        assert_eq!(left_over, 0);

        // too big for a single page, fits at order 1
        let (num, _) = cache_estimate(0, PAGE_SIZE, 32, CacheFlags::empty());
        assert_eq!(num, 0);
        let (num, _) = cache_estimate(1, PAGE_SIZE, 32, CacheFlags::empty());
        assert_eq!(num, 1);
    }

    #[test]
    fn first_allocation_grows_exactly_one_slab() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let cache = mm
            .create_cache("vnode", 64, 0, CacheFlags::HWCACHE_ALIGN, None, None)
            .unwrap();
        assert_eq!(cache.slab_counts(), (0, 0, 0));
        assert_eq!(cache.free_objects(), 0);

        let object = mm.cache_alloc(cache).unwrap();
        assert_eq!(cache.slab_counts(), (0, 1, 0));
        assert_eq!(cache.free_objects(), cache.objects_per_slab() - 1);
        mm.cache_free(cache, object);
    }

    #[test]
    fn hwcache_alignment_shrinks_for_tiny_objects() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let cache = mm
            .create_cache("tiny", 9, 0, CacheFlags::HWCACHE_ALIGN, None, None)
            .unwrap();
        // 9 bytes word-aligns to 16, which fits twice into a 32-byte line
        assert_eq!(cache.object_size(), 16);
        let a = mm.cache_alloc(cache).unwrap();
        let b = mm.cache_alloc(cache).unwrap();
        assert_eq!(a.as_ptr() as usize % 16, 0);
        assert_eq!(b.as_ptr() as usize % 16, 0);
        mm.cache_free(cache, a);
        mm.cache_free(cache, b);
    }

    #[test]
    fn slabs_move_between_the_three_lists() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        // 1024-byte objects in an order-0 slab leave room for only a few
        let cache = mm
            .create_cache("chunky", 1024, 0, CacheFlags::empty(), None, None)
            .unwrap();
        let num = cache.objects_per_slab();
        let mut objects = Vec::new();
        for _ in 0..num {
            objects.push(mm.cache_alloc(cache).unwrap());
        }
        assert_eq!(cache.slab_counts(), (1, 0, 0));
        assert_eq!(cache.free_objects(), 0);

        // freeing one object moves the slab from full to partial
        mm.cache_free(cache, objects.pop().unwrap());
        assert_eq!(cache.slab_counts(), (0, 1, 0));

        // freeing the rest empties the slab; it is retained on the free list
        for object in objects.drain(..) {
            mm.cache_free(cache, object);
        }
        assert_eq!(cache.slab_counts(), (0, 0, 1));
        assert_eq!(cache.free_objects(), num);
    }

    #[test]
    fn alloc_free_pair_restores_cache_state() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let cache = mm
            .create_cache("pairwise", 128, 0, CacheFlags::empty(), None, None)
            .unwrap();
        // warm the cache up so that a retained slab exists
        let warm = mm.cache_alloc(cache).unwrap();
        mm.cache_free(cache, warm);

        let counts = cache.slab_counts();
        let free_objects = cache.free_objects();
        let object = mm.cache_alloc(cache).unwrap();
        mm.cache_free(cache, object);
        assert_eq!(cache.slab_counts(), counts);
        assert_eq!(cache.free_objects(), free_objects);
    }

    #[test]
    fn zero_free_limit_returns_empty_slabs_to_the_buddy() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let cache = mm
            .create_cache("transient", 256, 0, CacheFlags::empty(), None, None)
            .unwrap();
        mm.set_cache_free_limit(cache, 0);
        let pages_before = mm.zone().free_pages();
        let object = mm.cache_alloc(cache).unwrap();
        assert!(mm.zone().free_pages() < pages_before);
        mm.cache_free(cache, object);
        assert_eq!(cache.slab_counts(), (0, 0, 0));
        assert_eq!(cache.free_objects(), 0);
        assert_eq!(mm.zone().free_pages(), pages_before);
    }

    #[test]
    fn colouring_rotates_slab_starts() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let cache = mm
            .create_cache("coloured", 300, 0, CacheFlags::empty(), None, None)
            .unwrap();
        assert!(cache.colours() > 1, "geometry must leave colouring room");
        let num = cache.objects_per_slab();
        // drain two full slabs and compare the page offsets of their objects
        let mut first_slab = Vec::new();
        for _ in 0..num {
            first_slab.push(mm.cache_alloc(cache).unwrap());
        }
        let second = mm.cache_alloc(cache).unwrap();
        let offset_of = |p: NonNull<u8>| p.as_ptr() as usize & (PAGE_SIZE - 1);
        assert_eq!(
            offset_of(second),
            offset_of(first_slab[0]) + CACHE_LINE_SIZE,
            "second slab must start one colour step later"
        );
        mm.cache_free(cache, second);
        for object in first_slab {
            mm.cache_free(cache, object);
        }
    }

    static CTOR_RUNS: AtomicUsize = AtomicUsize::new(0);
    static DTOR_RUNS: AtomicUsize = AtomicUsize::new(0);

    fn counting_ctor(_object: *mut u8) {
        CTOR_RUNS.fetch_add(1, Ordering::SeqCst);
    }

    fn counting_dtor(_object: *mut u8) {
        DTOR_RUNS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn constructors_and_destructors_run_per_slab() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let cache = mm
            .create_cache(
                "ctor-cache",
                512,
                0,
                CacheFlags::empty(),
                Some(counting_ctor),
                Some(counting_dtor),
            )
            .unwrap();
        mm.set_cache_free_limit(cache, 0);
        let num = cache.objects_per_slab();
        let object = mm.cache_alloc(cache).unwrap();
        assert_eq!(CTOR_RUNS.load(Ordering::SeqCst), num);
        assert_eq!(DTOR_RUNS.load(Ordering::SeqCst), 0);
        // the free empties the slab and, with a zero limit, destroys it
        mm.cache_free(cache, object);
        assert_eq!(DTOR_RUNS.load(Ordering::SeqCst), num);
    }

    #[test]
    fn off_slab_descriptors_work_end_to_end() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let cache = mm
            .create_cache("bulk", 2048, 0, CacheFlags::OFF_SLAB, None, None)
            .unwrap();
        // a whole block's worth of objects, no descriptor overhead
        assert_eq!(
            cache.objects_per_slab(),
            (PAGE_SIZE << cache.order()) / cache.object_size()
        );
        mm.set_cache_free_limit(cache, 0);
        // warm the descriptor cache up so its slab does not skew the count
        let warm = mm.kmalloc(mem::size_of::<SlabDesc>()).unwrap();
        mm.kfree(warm);
        let pages_before = mm.zone().free_pages();
        let a = mm.cache_alloc(cache).unwrap();
        let b = mm.cache_alloc(cache).unwrap();
        mm.cache_free(cache, a);
        mm.cache_free(cache, b);
        assert_eq!(cache.slab_counts(), (0, 0, 0));
        assert_eq!(mm.zone().free_pages(), pages_before);
    }

    #[test]
    #[should_panic]
    fn freeing_to_the_wrong_cache_panics() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let a = mm
            .create_cache("cache-a", 64, 0, CacheFlags::empty(), None, None)
            .unwrap();
        let b = mm
            .create_cache("cache-b", 64, 0, CacheFlags::empty(), None, None)
            .unwrap();
        let object = mm.cache_alloc(a).unwrap();
        mm.cache_free(b, object);
    }

    #[test]
    #[should_panic]
    fn freeing_a_non_slab_pointer_panics() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let cache = mm
            .create_cache("cache-c", 64, 0, CacheFlags::empty(), None, None)
            .unwrap();
        let block = mm.alloc_pages(0).unwrap();
        let stray = mm.mapping().frame_ptr(block);
        mm.cache_free(cache, NonNull::new(stray).unwrap());
    }

    #[test]
    fn oversized_objects_are_rejected() {
        let arena = TestArena::new(ARENA_SIZE);
        let mut mm = boot_arena(&arena, HEAP_FRAMES);
        let too_big = (PAGE_SIZE << MAX_SLAB_ORDER) + 1;
        match mm.create_cache("giant", too_big, 0, CacheFlags::OFF_SLAB, None, None) {
            Err(CacheError::ObjectTooLarge) => {}
            other => panic!("unexpected result: {:?}", other.map(|c| c.name())),
        }
    }
}
