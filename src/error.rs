use thiserror::Error;

use crate::strategy::Strategy;

/// Errors reported by [`Arena::format`](crate::Arena::format) and
/// [`Arena::reformat`](crate::Arena::reformat).
///
/// Format wipes the buffer before it can fail, so a failed format still
/// leaves the buffer zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
  #[error("buffer of {len} bytes is below the minimum arena size of {min} bytes")]
  BufferTooSmall { len: usize, min: usize },

  #[error("unknown strategy selector {0}")]
  UnknownStrategy(u32),
}

/// A strategy name that is neither a known name nor a known selector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown strategy `{0}` (expected list, no-free, fail or a selector 0-3)")]
pub struct ParseStrategyError(pub String);

/// Cause recorded in the error latch of a poisoned arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum Fault {
  #[error("pointer lies outside the working region")]
  OutOfRange = 1,

  #[error("pointer is not the start of a block")]
  Misaligned = 2,

  #[error("boundary tag records an implausible size")]
  CorruptTag = 3,

  #[error("block is already on the free list")]
  DoubleFree = 4,

  #[error("trace sink reported a failure")]
  TraceFailed = 5,
}

impl Fault {
  /// Decodes a latch value. `0` means the latch is clear.
  pub fn from_code(code: u32) -> Option<Self> {
    match code {
      1 => Some(Self::OutOfRange),
      2 => Some(Self::Misaligned),
      3 => Some(Self::CorruptTag),
      4 => Some(Self::DoubleFree),
      5 => Some(Self::TraceFailed),
      _ => None,
    }
  }

  pub fn code(self) -> u32 {
    self as u32
  }
}

/// Recoverable failure of an allocation, validity or introspection call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
  /// The error latch is set; only a reformat clears it.
  #[error("arena is poisoned: {0}")]
  Poisoned(Fault),

  #[error("no space left for a request of {requested} bytes")]
  Exhausted { requested: usize },

  #[error("operation not supported by the {0} strategy")]
  Unsupported(Strategy),

  #[error("zero-sized allocation requested")]
  ZeroSize,
}
