//! Intrusive doubly linked lists of slab descriptors.

use core::ptr;

use super::SlabDesc;

/// A list of slab descriptors threaded through their `prev`/`next` fields.
/// A descriptor is on at most one list at a time.
pub struct SlabList {
    head: *mut SlabDesc,
    tail: *mut SlabDesc,
    length: usize,
}

impl SlabList {
    pub const fn new() -> SlabList {
        SlabList {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            length: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn head(&self) -> Option<*mut SlabDesc> {
        if self.head.is_null() {
            None
        } else {
            Some(self.head)
        }
    }

    /// # Safety
    ///
    /// `slab` must be a valid descriptor that is currently on no list.
    pub unsafe fn push_front(&mut self, slab: *mut SlabDesc) {
        (*slab).prev = ptr::null_mut();
        (*slab).next = self.head;
        if self.head.is_null() {
            self.tail = slab;
        } else {
            (*self.head).prev = slab;
        }
        self.head = slab;
        self.length += 1;
    }

    /// # Safety
    ///
    /// `slab` must be a valid descriptor that is currently on no list.
    pub unsafe fn push_back(&mut self, slab: *mut SlabDesc) {
        (*slab).prev = self.tail;
        (*slab).next = ptr::null_mut();
        if self.tail.is_null() {
            self.head = slab;
        } else {
            (*self.tail).next = slab;
        }
        self.tail = slab;
        self.length += 1;
    }

    /// # Safety
    ///
    /// `slab` must currently be on this list.
    pub unsafe fn remove(&mut self, slab: *mut SlabDesc) {
        debug_assert!(self.length > 0);
        if (*slab).prev.is_null() {
            debug_assert_eq!(self.head, slab);
            self.head = (*slab).next;
        } else {
            (*(*slab).prev).next = (*slab).next;
        }
        if (*slab).next.is_null() {
            debug_assert_eq!(self.tail, slab);
            self.tail = (*slab).prev;
        } else {
            (*(*slab).next).prev = (*slab).prev;
        }
        (*slab).prev = ptr::null_mut();
        (*slab).next = ptr::null_mut();
        self.length -= 1;
    }

    /// Unlink and return the first descriptor.
    ///
    /// # Safety
    ///
    /// All descriptors on the list must still be valid.
    pub unsafe fn pop_front(&mut self) -> Option<*mut SlabDesc> {
        let slab = self.head()?;
        self.remove(slab);
        Some(slab)
    }
}
