use std::{
  marker::PhantomData,
  ptr::{self, NonNull},
};

use crate::{
  align::align_up,
  error::{ArenaError, Fault, FormatError},
  header::{Header, MIN_ARENA_SIZE, WORKING_OFFSET},
  strategy::{Strategy, dispatch},
  trace::{Trace, note},
};

/// Handle to an arena formatted inside a caller-supplied buffer.
///
/// The handle is the address of the header at the aligned base of the
/// buffer. It borrows the buffer for `'buf` and owns nothing: dropping the
/// handle leaves the buffer as it is, and there is no teardown step.
///
/// The handle is neither `Send` nor `Sync`; an arena is driven by one
/// execution context at a time.
pub struct Arena<'buf> {
  header: NonNull<Header<'buf>>,
  _buf: PhantomData<&'buf mut Header<'buf>>,
}

impl<'buf> Arena<'buf> {
  /// Formats `buf` as an arena using `strategy`.
  ///
  /// The whole buffer is zeroed first, even when formatting then fails.
  pub fn format(
    buf: &'buf mut [u8],
    strategy: Strategy,
  ) -> Result<Self, FormatError> {
    Self::format_with_selector(buf, strategy.selector())
  }

  /// Formats `buf` with a numeric strategy selector; `0` picks the default.
  pub fn format_with_selector(
    buf: &'buf mut [u8],
    selector: u32,
  ) -> Result<Self, FormatError> {
    buf.fill(0);
    let strategy = Strategy::from_selector(selector)?;
    let len = buf.len();
    let start = NonNull::from(buf).cast::<u8>();

    unsafe { Self::format_raw(start, len, strategy) }
  }

  /// # Safety
  ///
  /// `start..start + len` must be zeroed memory exclusively borrowed for `'buf`.
  unsafe fn format_raw(
    start: NonNull<u8>,
    len: usize,
    strategy: Strategy,
  ) -> Result<Self, FormatError> {
    if len < MIN_ARENA_SIZE {
      return Err(FormatError::BufferTooSmall {
        len,
        min: MIN_ARENA_SIZE,
      });
    }

    let addr = start.as_ptr() as usize;
    let buf_offset = align_up(addr) - addr;
    let aligned = unsafe { start.add(buf_offset) };
    let base = unsafe { aligned.add(WORKING_OFFSET) };

    let mut header = Header::new(strategy, buf_offset, len);
    dispatch!(strategy, init(&mut header, base));

    let slot = aligned.cast::<Header<'buf>>();
    unsafe { slot.as_ptr().write(header) };

    tracing::debug!(
      %strategy,
      buf_len = len,
      working_len = len - buf_offset - WORKING_OFFSET,
      "formatted arena at {:p}",
      slot
    );

    Ok(Self {
      header: slot,
      _buf: PhantomData,
    })
  }

  /// Formats the arena's buffer again with `strategy`.
  ///
  /// The handle keeps its address. Every earlier allocation is invalidated,
  /// the error latch is cleared and the trace sink is detached.
  pub fn reformat(
    &mut self,
    strategy: Strategy,
  ) -> Result<(), FormatError> {
    let header = self.header();
    header.validate();
    let (buf_offset, buf_len) = (header.buf_offset(), header.buf_len());

    let start = unsafe { self.header.cast::<u8>().sub(buf_offset) };
    unsafe { ptr::write_bytes(start.as_ptr(), 0, buf_len) };

    let fresh = unsafe { Self::format_raw(start, buf_len, strategy) }?;
    assert_eq!(fresh.header, self.header, "reformat moved the arena header");

    tracing::debug!(%strategy, "reformatted arena at {:p}", self.header);
    Ok(())
  }

  /// Address of the header; stable for the life of the arena.
  pub fn as_ptr(&self) -> *const u8 {
    self.header.as_ptr().cast_const().cast()
  }

  pub fn strategy(&self) -> Strategy {
    let header = self.header();
    header.validate();
    header.strategy()
  }

  /// The fault held by the error latch, if the arena is poisoned.
  pub fn fault(&self) -> Option<Fault> {
    let header = self.header();
    header.validate();
    header.fault()
  }

  /// Bytes between the end of the header and the end of the buffer.
  pub fn working_len(&self) -> usize {
    let header = self.header();
    header.validate();
    header.working_len()
  }

  /// Attaches `trace` as the diagnostic sink, or detaches it with `None`.
  pub fn set_trace(
    &mut self,
    trace: Option<&'buf mut dyn Trace>,
  ) -> Result<(), ArenaError> {
    self.enter()?;
    self.header_mut().set_trace(trace);
    Ok(())
  }

  /// Allocates, resizes or frees depending on the arguments:
  ///
  /// | `ptr`  | `new_size`          | effect                      |
  /// |--------|---------------------|-----------------------------|
  /// | `None` | `> 0`               | new allocation              |
  /// | `Some` | `0`                 | free, always returns `None` |
  /// | `Some` | `<= old_size`       | unchanged, returns `ptr`    |
  /// | `Some` | `> old_size`        | grow                        |
  ///
  /// Returns `None` on any failure, and always once the arena is poisoned.
  ///
  /// # Safety
  ///
  /// `ptr` must be `None` or a live allocation of this arena, returned since
  /// the last format, whose size is `old_size`.
  pub unsafe fn allocate(
    &mut self,
    ptr: Option<NonNull<u8>>,
    old_size: usize,
    new_size: usize,
  ) -> Option<NonNull<u8>> {
    let strategy = self.enter().ok()?;
    if strategy == Strategy::Fail {
      return None;
    }

    match (ptr, new_size) {
      (None, 0) => None,
      (Some(ptr), 0) => {
        // A free answers `None` whether or not it succeeded; failures are
        // already traced and latched by `free_entered`.
        unsafe { self.free_entered(strategy, ptr, old_size) }.ok();
        None
      }
      (Some(ptr), new_size) if new_size <= old_size => Some(ptr),
      (None, new_size) => self.alloc_entered(strategy, new_size).ok(),
      (Some(ptr), new_size) => unsafe { self.grow_entered(strategy, ptr, old_size, new_size) }.ok(),
    }
  }

  /// Allocates `size` bytes, aligned to [`ALIGNMENT`](crate::align::ALIGNMENT).
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let strategy = self.enter()?;
    if size == 0 {
      return Err(ArenaError::ZeroSize);
    }
    self.alloc_entered(strategy, size)
  }

  /// Returns an allocation to the arena.
  ///
  /// A target that cannot be a live block of this arena poisons it.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by this arena since its last format and
  /// not freed since. `size` is the allocation's size, or `0` if unknown.
  pub unsafe fn free(
    &mut self,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<(), ArenaError> {
    let strategy = self.enter()?;
    unsafe { self.free_entered(strategy, ptr, size) }
  }

  /// Resizes an allocation, moving it when it cannot grow where it stands.
  ///
  /// Shrinking never moves. If growing fails the original allocation stays
  /// valid. The no-free strategy only shrinks.
  ///
  /// # Safety
  ///
  /// Same contract as [`Arena::allocate`].
  pub unsafe fn resize(
    &mut self,
    ptr: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let strategy = self.enter()?;
    if strategy == Strategy::Fail {
      return Err(ArenaError::Exhausted { requested: new_size });
    }
    if new_size == 0 {
      return Err(ArenaError::ZeroSize);
    }
    if new_size <= old_size {
      return Ok(ptr);
    }
    unsafe { self.grow_entered(strategy, ptr, old_size, new_size) }
  }

  /// Whether `ptr` lies in the working region. The one-past-the-end address
  /// counts as in range.
  pub fn is_in_range(
    &self,
    ptr: *const u8,
  ) -> Result<bool, ArenaError> {
    self.enter()?;
    let start = self.base().as_ptr() as usize;
    let end = start + self.header().working_len();
    let addr = ptr as usize;

    Ok(addr >= start && addr <= end)
  }

  /// Whether `ptr` points into memory currently handed out by the arena.
  pub fn is_allocated(
    &self,
    ptr: *const u8,
  ) -> Result<bool, ArenaError> {
    let strategy = self.enter()?;
    let header = self.header();
    let base = self.base();

    Ok(match header.offset_of(base, ptr) {
      Some(offset) => dispatch!(strategy, is_allocated(header, base, offset)),
      None => false,
    })
  }

  /// Largest single request that is guaranteed to succeed right now.
  pub fn max_allocatable(&self) -> Result<usize, ArenaError> {
    let strategy = self.enter()?;
    dispatch!(strategy, max_allocatable(self.header(), self.base()))
  }

  /// Bytes spent on bookkeeping rather than on allocations.
  pub fn overhead(&self) -> Result<usize, ArenaError> {
    let strategy = self.enter()?;
    dispatch!(strategy, overhead(self.header()))
  }

  /// Bytes not currently handed out.
  pub fn free_bytes(&self) -> Result<usize, ArenaError> {
    let strategy = self.enter()?;
    dispatch!(strategy, free_bytes(self.header()))
  }

  /// Capacity managed by the strategy.
  pub fn total(&self) -> Result<usize, ArenaError> {
    let strategy = self.enter()?;
    dispatch!(strategy, total(self.header()))
  }

  fn header(&self) -> &Header<'buf> {
    unsafe { self.header.as_ref() }
  }

  fn header_mut(&mut self) -> &mut Header<'buf> {
    unsafe { self.header.as_mut() }
  }

  fn base(&self) -> NonNull<u8> {
    unsafe { self.header.cast::<u8>().add(WORKING_OFFSET) }
  }

  /// Common prologue: header invariants, then the error latch.
  fn enter(&self) -> Result<Strategy, ArenaError> {
    let header = self.header();
    header.validate();
    match header.fault() {
      Some(fault) => Err(ArenaError::Poisoned(fault)),
      None => Ok(header.strategy()),
    }
  }

  fn alloc_entered(
    &mut self,
    strategy: Strategy,
    size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let base = self.base();
    let header = self.header_mut();

    let result = dispatch!(strategy, alloc(header, base, size));
    if let Err(ArenaError::Exhausted { requested }) = result {
      note!(header, "{} strategy cannot satisfy {} bytes", strategy, requested)?;
    }
    result
  }

  unsafe fn free_entered(
    &mut self,
    strategy: Strategy,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<(), ArenaError> {
    let base = self.base();
    let header = self.header_mut();

    let result = unsafe { dispatch!(strategy, free(header, base, ptr, size)) };
    if let Err(ArenaError::Unsupported(_)) = result {
      note!(header, "{} strategy does not free {:p}", strategy, ptr)?;
    }
    result
  }

  unsafe fn grow_entered(
    &mut self,
    strategy: Strategy,
    ptr: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let base = self.base();
    let header = self.header_mut();

    let result = unsafe { dispatch!(strategy, grow(header, base, ptr, old_size, new_size)) };
    match result {
      Err(ArenaError::Exhausted { requested }) => {
        note!(header, "{} strategy cannot grow {:p} to {} bytes", strategy, ptr, requested)?;
      }
      Err(ArenaError::Unsupported(_)) => {
        note!(header, "{} strategy does not grow {:p}", strategy, ptr)?;
      }
      _ => {}
    }
    result
  }
}

impl std::fmt::Debug for Arena<'_> {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>,
  ) -> std::fmt::Result {
    let header = self.header();
    f.debug_struct("Arena")
      .field("at", &self.header)
      .field("strategy", &header.strategy())
      .field("fault", &header.fault())
      .field("working_len", &header.working_len())
      .finish()
  }
}
