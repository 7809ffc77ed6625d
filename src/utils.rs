//! Helper functions that don't particularly belong to any concrete module of the allocator.

/// It aligns `to_be_aligned` up to the next multiple of `alignment`, which must be a
/// power of two.
///
/// Used to round block sizes to [`crate::ALIGNMENT`] and arena capacities to the page size.
/// Returns `None` if rounding up would overflow `usize`.
#[inline]
pub fn align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());

    to_be_aligned
        .checked_add(alignment - 1)
        .map(|value| value & !(alignment - 1))
}

/// Whether `value` is a multiple of `alignment` (a power of two).
#[inline]
pub fn is_aligned(value: usize, alignment: usize) -> bool {
    value & (alignment - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_sixteen() {
        let alignments = vec![(1..=16, 16), (17..=32, 32), (33..=48, 48)];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(Some(expected), align(size, 16));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let alignments = vec![(1..=4096, 4096), (4097..=8192, 8192)];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(Some(expected), align(size, 4096))
            }
        }
    }

    #[test]
    fn aligned_values_are_unchanged() {
        assert_eq!(Some(0), align(0, 16));
        assert_eq!(Some(64), align(64, 16));
        assert!(is_aligned(64, 16));
        assert!(!is_aligned(72, 16));
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(None, align(usize::MAX, 16));
        assert_eq!(None, align(usize::MAX - 3, 8));
    }
}
