//! Half-open ranges of physical addresses.

use core::fmt;

use crate::PhysAddr;

/// A half-open range `[start, end)` of physical addresses.
#[derive(Eq, PartialEq, Copy, Clone)]
pub struct PhysRange {
    start: PhysAddr,
    end: PhysAddr,
}

impl PhysRange {
    /// Build a range from its bounds. `start` must not exceed `end`.
    pub fn from_bounds(start: PhysAddr, end: PhysAddr) -> PhysRange {
        assert!(start <= end, "range start must not exceed its end");
        PhysRange { start, end }
    }

    /// Build a range from its start and a length in bytes.
    pub fn new(start: PhysAddr, length: usize) -> PhysRange {
        PhysRange {
            start,
            end: start + length,
        }
    }

    pub fn start(&self) -> PhysAddr {
        self.start
    }

    pub fn end(&self) -> PhysAddr {
        self.end
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.start && addr < self.end
    }
}

impl fmt::Debug for PhysRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:p}, {:p})", self.start, self.end)
    }
}
