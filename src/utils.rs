//! Utility functions.

/// Size of a memory page in the output image.
pub const PAGE_SIZE: u64 = 0x1000;

/// Rounds `value` up to the next multiple of `align`, a power of two.
pub fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value.wrapping_add(align - 1) & !(align - 1)
}

/// Like [`align_up`], but `None` if the result does not fit in a `u64`.
pub fn checked_align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_page() {
        assert_eq!(align_up(0, PAGE_SIZE), 0);
        assert_eq!(align_up(1, PAGE_SIZE), 0x1000);
        assert_eq!(align_up(0x1000, PAGE_SIZE), 0x1000);
        assert_eq!(align_up(0x401009, PAGE_SIZE), 0x402000);
    }

    #[test]
    fn checked_rounding_near_the_top() {
        assert_eq!(checked_align_up(0x401009, PAGE_SIZE), Some(0x402000));
        assert_eq!(checked_align_up(u64::MAX - 0xfff, PAGE_SIZE), Some(u64::MAX - 0xfff));
        assert_eq!(checked_align_up(u64::MAX - 0x10, PAGE_SIZE), None);
    }
}
