/// Alignment every arena address and block offset is rounded to.
pub const ALIGNMENT: usize = 16;

const ALIGN_MASK: usize = ALIGNMENT - 1;

const _: () = assert!(ALIGNMENT.is_power_of_two());

/// Rounds `value` up to the next multiple of [`ALIGNMENT`].
///
/// `align_up(0) == 0`, and values that are already aligned are returned
/// unchanged.
///
/// # Examples
///
/// ```rust
/// use rarena::align::{ALIGNMENT, align_up};
///
/// assert_eq!(align_up(0), 0);
/// assert_eq!(align_up(1), ALIGNMENT);
/// assert_eq!(align_up(ALIGNMENT + 1), 2 * ALIGNMENT);
/// ```
pub const fn align_up(value: usize) -> usize {
  (value & !ALIGN_MASK) + if value & ALIGN_MASK != 0 { ALIGNMENT } else { 0 }
}

/// Returns `true` when `value` is a multiple of [`ALIGNMENT`].
pub const fn is_aligned(value: usize) -> bool {
  value & ALIGN_MASK == 0
}

/// Rounds the given size up to the arena alignment.
///
/// # Examples
///
/// ```rust
/// use rarena::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(33), 48);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align::align_up($value)
  };
}
