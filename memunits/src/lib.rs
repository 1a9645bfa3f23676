//! Units and newtypes for talking about physical memory: addresses, address
//! ranges and alignment arithmetic shared by every memory-management crate.

#![cfg_attr(not(test), no_std)]

mod addr;
mod align;
mod range;

pub use addr::{PhysAddr, VirtAddr};
pub use align::Alignable;
pub use range::PhysRange;

/// Number of trailing zeros in a page aligned address.
pub const PAGE_ALIGN_BITS: u32 = 12;

/// Size of a physical page frame, 4096 bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_ALIGN_BITS;
