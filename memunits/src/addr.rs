//! Newtype wrappers that make it harder to accidentally confuse physical and
//! virtual addresses.

use core::fmt;
use core::ops;

use crate::align::{self, Alignable};

/// A physical address. Whether it is accessible depends on the current page
/// mapping.
#[repr(C)]
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug)]
pub struct PhysAddr(pub usize);

/// A virtual address. Its validity depends on the current page mapping.
#[repr(C)]
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// Reinterpret the address as a pointer.
    ///
    /// # Safety
    ///
    /// The address must actually be mapped and point to a valid `T` for the
    /// pointer to be dereferencable.
    pub unsafe fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Reinterpret the address as a mutable pointer, see [`VirtAddr::as_ptr`].
    ///
    /// # Safety
    ///
    /// Same requirements as [`VirtAddr::as_ptr`].
    pub unsafe fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

macro_rules! addr_arith {
    ($addr:tt) => {
        impl Alignable for $addr {
            fn align_up(self, alignment: usize) -> Self {
                $addr(align::up(self.0, alignment))
            }

            fn align_down(self, alignment: usize) -> Self {
                $addr(align::down(self.0, alignment))
            }

            fn is_aligned(self, alignment: usize) -> bool {
                align::down(self.0, alignment) == self.0
            }
        }

        impl ops::Add<usize> for $addr {
            type Output = $addr;

            fn add(self, other: usize) -> $addr {
                $addr(self.0 + other)
            }
        }

        impl ops::AddAssign<usize> for $addr {
            fn add_assign(&mut self, other: usize) {
                self.0 += other;
            }
        }

        impl ops::Sub<usize> for $addr {
            type Output = $addr;

            fn sub(self, other: usize) -> $addr {
                $addr(self.0 - other)
            }
        }

        impl ops::Sub<$addr> for $addr {
            type Output = usize;

            fn sub(self, other: $addr) -> usize {
                self.0 - other.0
            }
        }
    };
}

addr_arith!(PhysAddr);
addr_arith!(VirtAddr);

impl fmt::Pointer for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PHYS_0x{:016x}", self.0)
    }
}

impl fmt::Pointer for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "VIRT_0x{:016x}", self.0)
    }
}
