//! Intrusive free list threaded through the leading bytes of free objects.
//!
//! A free object's first word holds the address of the next free object. In
//! debug builds the second word (when the object has one) carries a poison
//! marker so that writes through dangling pointers are caught on the next
//! allocation of the clobbered object.

use core::mem;
use core::ptr;

#[cfg(debug_assertions)]
const FREE_POISON: usize = 0xDEAD_BEEF_DEAD_BEEF_u64 as usize;

/// Cursor over the free objects of one slab.
pub struct FreeList {
    head: *mut u8,
}

impl FreeList {
    pub const fn new() -> FreeList {
        FreeList {
            head: ptr::null_mut(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Push a free object.
    ///
    /// # Safety
    ///
    /// `object` must point to at least `object_size` bytes of memory that no
    /// one else is using, and must stay untouched until popped again.
    pub unsafe fn push(&mut self, object: *mut u8, object_size: usize) {
        (object as *mut usize).write(self.head as usize);
        #[cfg(debug_assertions)]
        {
            if object_size >= 2 * mem::size_of::<usize>() {
                (object as *mut usize).add(1).write(FREE_POISON);
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = object_size;
        self.head = object;
    }

    /// Pop the most recently pushed object, verifying its poison marker in
    /// debug builds.
    ///
    /// # Safety
    ///
    /// All objects on the list must still be valid, see [`FreeList::push`].
    pub unsafe fn pop(&mut self, object_size: usize) -> Option<*mut u8> {
        if self.head.is_null() {
            return None;
        }
        let object = self.head;
        #[cfg(debug_assertions)]
        {
            if object_size >= 2 * mem::size_of::<usize>() {
                let marker = (object as *const usize).add(1).read();
                assert!(
                    marker == FREE_POISON,
                    "[kmem] free object at {:p} was overwritten while free",
                    object
                );
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = object_size;
        self.head = (object as *const usize).read() as *mut u8;
        Some(object)
    }
}
