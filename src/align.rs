/// Every chunk header and payload starts on this boundary.
pub const ALIGNMENT: usize = 16;

/// Rounds a size up to the allocation granule ([`ALIGNMENT`]).
///
/// # Examples
///
/// ```rust
/// use pagealloc::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
///
/// ```rust
/// use pagealloc::align_to;
///
/// assert_eq!(align_to!(4097, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds `value` up to a multiple of `step`, which need not be a power of two.
///
/// Returns `None` on overflow.
pub fn round_up_multiple(
  value: usize,
  step: usize,
) -> Option<usize> {
  debug_assert!(step > 0);
  value.div_ceil(step).checked_mul(step)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));

      let expected_alignment = ALIGNMENT * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_align_to_page() {
    assert_eq!(align_to!(1usize, 4096usize), 4096);
    assert_eq!(align_to!(4096usize, 4096usize), 4096);
    assert_eq!(align_to!(4097usize, 4096usize), 8192);
    assert_eq!(align_to!(0usize, 4096usize), 0);
  }

  #[test]
  fn test_round_up_multiple() {
    assert_eq!(round_up_multiple(3_000_080, 2 << 20), Some(4 << 20));
    assert_eq!(round_up_multiple(2 << 20, 2 << 20), Some(2 << 20));
    assert_eq!(round_up_multiple(usize::MAX, 4096), None);
  }
}
