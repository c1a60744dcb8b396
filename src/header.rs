use std::{fmt, mem, ptr::NonNull};

use crate::{
  align::{ALIGNMENT, align_up, is_aligned},
  block::UNIT,
  bump::BumpState,
  error::{ArenaError, Fault},
  list::ListState,
  strategy::Strategy,
  trace::{Record, Trace},
};

/// Canary stamped at the front of every formatted arena.
pub(crate) const MAGIC: u32 = 0x414E_5241;

/// Control block written at the aligned base of the caller's buffer.
///
/// Every bound is kept as an offset so the block does not depend on where
/// the buffer lives. The trace sink is the one exception: it is a borrowed
/// reference owned by the caller.
#[repr(C)]
pub(crate) struct Header<'buf> {
  magic: u32,
  strategy: u32,
  fault: u32,
  _reserved: u32,
  buf_offset: usize,
  buf_len: usize,
  working_offset: usize,
  working_len: usize,
  pub bump: BumpState,
  pub list: ListState,
  trace: Option<&'buf mut dyn Trace>,
}

/// Size of the in-buffer control block.
pub const HEADER_SIZE: usize = mem::size_of::<Header<'static>>();

/// Smallest buffer [`Arena::format`](crate::Arena::format) accepts.
pub const MIN_ARENA_SIZE: usize = 2 * (HEADER_SIZE + ALIGNMENT);

/// Distance from the aligned base to the first byte of the working region.
pub(crate) const WORKING_OFFSET: usize = align_up(HEADER_SIZE);

const _: () = assert!(mem::align_of::<Header<'static>>() <= ALIGNMENT);

impl<'buf> Header<'buf> {
  pub fn new(
    strategy: Strategy,
    buf_offset: usize,
    buf_len: usize,
  ) -> Self {
    Self {
      magic: MAGIC,
      strategy: strategy.selector(),
      fault: 0,
      _reserved: 0,
      buf_offset,
      buf_len,
      working_offset: WORKING_OFFSET,
      working_len: buf_len - buf_offset - WORKING_OFFSET,
      bump: BumpState::default(),
      list: ListState::default(),
      trace: None,
    }
  }

  /// Checks the structural invariants of the header.
  ///
  /// Any violation means the buffer was corrupted or the handle misused, so
  /// this panics instead of letting the caller touch memory again.
  pub fn validate(&self) {
    assert_eq!(self.magic, MAGIC, "arena header canary is corrupt");
    assert!(self.buf_offset < ALIGNMENT, "aligned base lies outside the buffer");
    assert!(
      self.buf_len >= MIN_ARENA_SIZE,
      "arena buffer of {} bytes is below the minimum",
      self.buf_len
    );
    assert_eq!(self.working_offset, WORKING_OFFSET, "working region overlaps the header");
    assert!(is_aligned(self.working_offset));
    assert_eq!(
      self.buf_offset + self.working_offset + self.working_len,
      self.buf_len,
      "working region does not end at the buffer end"
    );
    assert!(
      Strategy::from_tag(self.strategy).is_some(),
      "unknown strategy tag {}",
      self.strategy
    );
    assert!(self.bump.high_water <= self.working_len, "high-water mark past the working region");
    assert!(self.list.units * UNIT <= self.working_len, "free list covers more than the working region");
    assert!(self.list.free_units <= self.list.units, "free list holds more units than exist");
  }

  pub fn strategy(&self) -> Strategy {
    match Strategy::from_tag(self.strategy) {
      Some(strategy) => strategy,
      None => panic!("unknown strategy tag {}", self.strategy),
    }
  }

  pub fn fault(&self) -> Option<Fault> {
    Fault::from_code(self.fault)
  }

  pub fn buf_offset(&self) -> usize {
    self.buf_offset
  }

  pub fn buf_len(&self) -> usize {
    self.buf_len
  }

  pub fn working_len(&self) -> usize {
    self.working_len
  }

  pub fn set_trace(
    &mut self,
    trace: Option<&'buf mut dyn Trace>,
  ) {
    self.trace = trace;
  }

  /// Offset of `ptr` inside the working region, if it points at a byte of it.
  pub fn offset_of(
    &self,
    base: NonNull<u8>,
    ptr: *const u8,
  ) -> Option<usize> {
    (ptr as usize)
      .checked_sub(base.as_ptr() as usize)
      .filter(|offset| *offset < self.working_len)
  }

  /// Reports an event to the trace sink.
  ///
  /// A fatal event latches `fault` before the sink runs. A sink failure
  /// latches [`Fault::TraceFailed`] unless a fault is already being latched.
  /// Once the latch is set nothing else is reported.
  pub fn emit(
    &mut self,
    fault: Option<Fault>,
    site: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
  ) -> Result<(), ArenaError> {
    if let Some(latched) = self.fault() {
      return Err(ArenaError::Poisoned(latched));
    }

    if let Some(fault) = fault {
      self.fault = fault.code();
      tracing::debug!(%fault, site, line, "arena poisoned: {}", args);
    } else {
      tracing::trace!(site, line, "arena event: {}", args);
    }

    let record = Record::new(fault.is_some(), site, line, args);
    if let Some(sink) = self.trace.as_deref_mut() {
      if sink.trace(&record).is_err() {
        let latched = fault.unwrap_or(Fault::TraceFailed);
        self.fault = latched.code();
        tracing::debug!(fault = %latched, "trace sink failed");
        return Err(ArenaError::Poisoned(latched));
      }
    }

    match fault {
      Some(fault) => Err(ArenaError::Poisoned(fault)),
      None => Ok(()),
    }
  }
}
