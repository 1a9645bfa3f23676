#![cfg_attr(not(test), no_std)]

//! The physical-memory management core of the kernel.
//!
//! Memory comes up in two tiers. The lower tier is a buddy allocator handing
//! out naturally aligned power-of-two runs of page frames, tracked by a
//! per-frame database. The upper tier is a slab allocator that carves those
//! runs into fixed-size objects, with a ladder of general-purpose caches
//! behind `kmalloc`. Before either exists, a throwaway bump allocator serves
//! the few boot-time allocations, most importantly the frame database itself.
//!
//! The [`boot`] module sequences the hand-over between the tiers, and
//! [`MemoryManager`] bundles the finished allocator stack.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate static_assertions;

pub mod boot;
pub mod global;
pub mod manager;
pub mod mapping;
pub mod physical;
pub mod slab;

#[cfg(test)]
pub(crate) mod testutil;

pub use manager::MemoryManager;
pub use memunits::{PAGE_ALIGN_BITS, PAGE_SIZE};

/// Number of buddy orders tracked per zone. The largest free block spans
/// `2^(BUDDY_ORDERS - 1)` page frames, i.e. 4 MiB.
pub const BUDDY_ORDERS: usize = 11;

/// Assumed L1 cache line size, used for slab colouring and for
/// hardware-cache aligned object caches.
pub const CACHE_LINE_SIZE: usize = 32;
