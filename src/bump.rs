use std::ptr::NonNull;

use crate::{
  align,
  error::ArenaError,
  header::Header,
  strategy::{Policy, Strategy},
};

/// State of the no-free strategy.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BumpState {
  /// Bytes of the working region consumed so far. Never decreases.
  pub high_water: usize,
}

/// Grow-only allocator: every request bumps the high-water mark forward.
pub(crate) struct NoFree;

impl Policy for NoFree {
  fn init(
    header: &mut Header<'_>,
    _base: NonNull<u8>,
  ) {
    header.bump = BumpState::default();
  }

  fn alloc(
    header: &mut Header<'_>,
    base: NonNull<u8>,
    size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let mark = align!(header.bump.high_water);
    let end = mark
      .checked_add(size)
      .filter(|end| *end <= header.working_len())
      .ok_or(ArenaError::Exhausted { requested: size })?;

    header.bump.high_water = end;
    tracing::trace!(offset = mark, size, "bump allocation");

    Ok(unsafe { base.add(mark) })
  }

  unsafe fn free(
    _header: &mut Header<'_>,
    _base: NonNull<u8>,
    _ptr: NonNull<u8>,
    _size: usize,
  ) -> Result<(), ArenaError> {
    Err(ArenaError::Unsupported(Strategy::NoFree))
  }

  /// Only shrinking is legal, and the dispatcher answers that before any
  /// policy runs.
  unsafe fn grow(
    _header: &mut Header<'_>,
    _base: NonNull<u8>,
    _ptr: NonNull<u8>,
    _old_size: usize,
    _new_size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    Err(ArenaError::Unsupported(Strategy::NoFree))
  }

  fn is_allocated(
    _header: &Header<'_>,
    _base: NonNull<u8>,
    _offset: usize,
  ) -> bool {
    true
  }

  fn max_allocatable(
    header: &Header<'_>,
    _base: NonNull<u8>,
  ) -> Result<usize, ArenaError> {
    let mark = align!(header.bump.high_water).min(header.working_len());
    Ok(header.working_len() - mark)
  }

  fn free_bytes(header: &Header<'_>) -> Result<usize, ArenaError> {
    Ok(header.working_len() - header.bump.high_water)
  }

  fn total(header: &Header<'_>) -> Result<usize, ArenaError> {
    Ok(header.working_len())
  }

  fn overhead(header: &Header<'_>) -> Result<usize, ArenaError> {
    Ok(header.buf_len() - header.working_len())
  }
}
