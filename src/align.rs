/// Alignment of every payload and every block size, in bytes.
pub const ALIGNMENT: usize = 8;

/// Rounds a byte count up to the allocator's [`ALIGNMENT`].
///
/// A second argument rounds to an arbitrary power of two instead.
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(1, 4096), 4096);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align!($value, $crate::align::ALIGNMENT)
  };
  ($value:expr, $to:expr) => {
    ($value + ($to - 1)) & !($to - 1)
  };
}

/// Like [`align!`] but returns `None` instead of wrapping around.
pub(crate) fn checked_align(value: usize) -> Option<usize> {
  value
    .checked_add(ALIGNMENT - 1)
    .map(|v| v & !(ALIGNMENT - 1))
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
    assert_eq!(align!(0, 4096), 0);
    assert_eq!(align!(4095, 4096), 4096);
    assert_eq!(align!(4097, 4096), 8192);
  }

  #[test]
  fn test_checked_align() {
    assert_eq!(checked_align(0), Some(0));
    assert_eq!(checked_align(9), Some(16));
    assert_eq!(checked_align(usize::MAX), None);
  }
}
