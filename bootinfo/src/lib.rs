//! The boot-time physical memory report.
//!
//! Whatever boot environment loads the kernel (multiboot shim, UEFI stub,
//! emulator harness) discovers which physical address ranges are backed by
//! usable RAM and which belong to firmware, device holes or the kernel image
//! itself. It hands that knowledge to the memory core as a flat slice of
//! [`MemoryRange`] values.

#![cfg_attr(not(test), no_std)]

use core::ops::Range;

use memunits::{Alignable, PhysAddr, PhysRange, PAGE_ALIGN_BITS, PAGE_SIZE};

/// Classification of a reported address range.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum RangeKind {
    /// Backed by RAM that the memory core may hand out.
    Usable,
    /// Must never be allocated (firmware tables, device memory, kernel image).
    Reserved,
}

/// One entry of the boot memory report.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub struct MemoryRange {
    range: PhysRange,
    kind: RangeKind,
}

impl MemoryRange {
    pub fn new(range: PhysRange, kind: RangeKind) -> MemoryRange {
        MemoryRange { range, kind }
    }

    pub fn usable(start: PhysAddr, end: PhysAddr) -> MemoryRange {
        MemoryRange::new(PhysRange::from_bounds(start, end), RangeKind::Usable)
    }

    pub fn reserved(start: PhysAddr, end: PhysAddr) -> MemoryRange {
        MemoryRange::new(PhysRange::from_bounds(start, end), RangeKind::Reserved)
    }

    pub fn range(&self) -> PhysRange {
        self.range
    }

    pub fn kind(&self) -> RangeKind {
        self.kind
    }

    pub fn is_usable(&self) -> bool {
        self.kind == RangeKind::Usable
    }

    /// The page frames fully contained in this range. Partially covered
    /// frames at either end are excluded, they cannot be handed out whole.
    pub fn frames_included(&self) -> Range<usize> {
        let first = self.range.start().align_up(PAGE_SIZE).0 >> PAGE_ALIGN_BITS;
        let end = self.range.end().align_down(PAGE_SIZE).0 >> PAGE_ALIGN_BITS;
        if first >= end {
            first..first
        } else {
            first..end
        }
    }
}

/// Total number of page frames implied by the highest usable address in the
/// report. The frame database covers exactly this many frames; anything the
/// report does not mention stays reserved.
pub fn frame_count(ranges: &[MemoryRange]) -> usize {
    ranges
        .iter()
        .filter(|r| r.is_usable())
        .map(|r| r.frames_included().end)
        .max()
        .unwrap_or(0)
}
