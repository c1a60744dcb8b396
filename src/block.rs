use std::{mem, ptr::NonNull};

use crate::align::ALIGNMENT;

/// Boundary tag stored in the first unit of every list-strategy block.
///
/// `size` counts whole units, tag included. `next` is the unit index of the
/// following free block and only means something while the block is free.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub next: usize,
}

/// Allocation granule of the list strategy, in bytes.
pub const UNIT: usize = mem::size_of::<Tag>();

const _: () = assert!(UNIT >= mem::size_of::<Tag>());
const _: () = assert!(UNIT % ALIGNMENT == 0);

impl Tag {
  pub fn new(
    size: usize,
    next: usize,
  ) -> Self {
    Self { size, next }
  }

  /// Number of units needed to hold `bytes` of payload plus the tag.
  pub const fn units_for(bytes: usize) -> usize {
    bytes.div_ceil(UNIT) + 1
  }

  /// Pointer to the tag of unit `index` in a region starting at `base`.
  ///
  /// # Safety
  ///
  /// `base` must be `UNIT`-aligned and `index` must lie inside the region.
  pub unsafe fn at(
    base: NonNull<u8>,
    index: usize,
  ) -> *mut Tag {
    unsafe { base.as_ptr().add(index * UNIT).cast::<Tag>() }
  }

  /// Reads the tag of unit `index`.
  ///
  /// # Safety
  ///
  /// Same contract as [`Tag::at`].
  pub unsafe fn read(
    base: NonNull<u8>,
    index: usize,
  ) -> Tag {
    unsafe { Self::at(base, index).read() }
  }

  /// Writes `tag` into unit `index`.
  ///
  /// # Safety
  ///
  /// Same contract as [`Tag::at`].
  pub unsafe fn write(
    self,
    base: NonNull<u8>,
    index: usize,
  ) {
    unsafe { Self::at(base, index).write(self) }
  }
}
