//! Alignment arithmetic for addresses and byte sizes.

/// Something (usually an address or a size) that can be aligned to a
/// power-of-two boundary expressed in the same units.
pub trait Alignable: Copy {
    /// Return the smallest multiple of `alignment` that is `>= self`.
    fn align_up(self, alignment: usize) -> Self;

    /// Return the largest multiple of `alignment` that is `<= self`.
    fn align_down(self, alignment: usize) -> Self;

    /// Return whether `self` is a multiple of `alignment`.
    fn is_aligned(self, alignment: usize) -> bool;
}

pub(crate) fn up(num: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return num;
    }
    let mask = alignment - 1;
    assert!(alignment & mask == 0, "alignment must be a power of two");
    // written this way so that aligning the highest addresses cannot overflow
    let padding = alignment - (num & mask);
    num + (padding & mask)
}

pub(crate) fn down(num: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return num;
    }
    let mask = alignment - 1;
    assert!(alignment & mask == 0, "alignment must be a power of two");
    num - (num & mask)
}

impl Alignable for usize {
    fn align_up(self, alignment: usize) -> usize {
        up(self, alignment)
    }

    fn align_down(self, alignment: usize) -> usize {
        down(self, alignment)
    }

    fn is_aligned(self, alignment: usize) -> bool {
        down(self, alignment) == self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn align_down_test() {
        assert_eq!(23_usize.align_down(8), 16);
        assert_eq!(24_usize.align_down(8), 24);
        assert_eq!(25_usize.align_down(8), 24);

        // edge cases
        assert_eq!(23_usize.align_down(0), 23);
        assert_eq!(0_usize.align_down(0), 0);
        assert_eq!(usize::max_value().align_down(0), usize::max_value());
    }

    #[test]
    fn align_up_test() {
        assert_eq!(23_usize.align_up(8), 24);
        assert_eq!(24_usize.align_up(8), 24);
        assert_eq!(25_usize.align_up(8), 32);

        // edge cases
        assert_eq!(23_usize.align_up(0), 23);
        assert_eq!(0_usize.align_up(0), 0);
        assert_eq!(usize::max_value().align_up(0), usize::max_value());
    }

    #[test]
    fn is_aligned_test() {
        assert!(4096_usize.is_aligned(4096));
        assert!(!4097_usize.is_aligned(4096));
        assert!(0_usize.is_aligned(8));
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_alignment_panics() {
        let _ = 17_usize.align_up(12);
    }
}
