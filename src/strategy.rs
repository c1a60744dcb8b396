use std::{fmt, ptr::NonNull, str::FromStr};

use crate::{
  error::{ArenaError, FormatError, ParseStrategyError},
  header::Header,
};

/// Allocation policy an arena is formatted with.
///
/// The set is closed; the numeric values are the selectors accepted by
/// [`Arena::format_with_selector`](crate::Arena::format_with_selector), where
/// selector `0` picks the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Strategy {
  /// Address-ordered circular free list with coalescing.
  #[default]
  List = 1,
  /// Grow-only bump allocation; nothing is ever reclaimed.
  NoFree = 2,
  /// Every request fails. For fault injection.
  Fail = 3,
}

impl Strategy {
  /// Selector that resolves to [`Strategy::default`].
  pub const DEFAULT_SELECTOR: u32 = 0;

  pub fn from_selector(selector: u32) -> Result<Self, FormatError> {
    match selector {
      Self::DEFAULT_SELECTOR => Ok(Self::default()),
      tag => Self::from_tag(tag).ok_or(FormatError::UnknownStrategy(selector)),
    }
  }

  pub fn selector(self) -> u32 {
    self as u32
  }

  pub(crate) fn from_tag(tag: u32) -> Option<Self> {
    match tag {
      1 => Some(Self::List),
      2 => Some(Self::NoFree),
      3 => Some(Self::Fail),
      _ => None,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Self::List => "list",
      Self::NoFree => "no-free",
      Self::Fail => "fail",
    }
  }
}

impl TryFrom<u32> for Strategy {
  type Error = FormatError;

  fn try_from(selector: u32) -> Result<Self, Self::Error> {
    Self::from_selector(selector)
  }
}

impl fmt::Display for Strategy {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Strategy {
  type Err = ParseStrategyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "default" => Ok(Self::default()),
      "list" => Ok(Self::List),
      "no-free" | "nofree" | "bump" => Ok(Self::NoFree),
      "fail" => Ok(Self::Fail),
      other => other
        .parse::<u32>()
        .ok()
        .and_then(|selector| Self::from_selector(selector).ok())
        .ok_or_else(|| ParseStrategyError(s.to_string())),
    }
  }
}

/// Contract shared by the allocation policies.
///
/// `base` is the first byte of the working region; offsets handed to and
/// computed by a policy are relative to it.
pub(crate) trait Policy {
  fn init(
    header: &mut Header<'_>,
    base: NonNull<u8>,
  );

  fn alloc(
    header: &mut Header<'_>,
    base: NonNull<u8>,
    size: usize,
  ) -> Result<NonNull<u8>, ArenaError>;

  /// # Safety
  ///
  /// `ptr` must have been returned by this arena since its last format.
  unsafe fn free(
    header: &mut Header<'_>,
    base: NonNull<u8>,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<(), ArenaError>;

  /// Grows the allocation at `ptr` from `old_size` to `new_size` bytes,
  /// where `new_size > old_size`.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation of this arena of at least `old_size`
  /// bytes.
  unsafe fn grow(
    header: &mut Header<'_>,
    base: NonNull<u8>,
    ptr: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>, ArenaError>;

  /// Whether the working-region byte at `offset` belongs to a live block.
  fn is_allocated(
    header: &Header<'_>,
    base: NonNull<u8>,
    offset: usize,
  ) -> bool;

  fn max_allocatable(
    header: &Header<'_>,
    base: NonNull<u8>,
  ) -> Result<usize, ArenaError>;

  fn free_bytes(header: &Header<'_>) -> Result<usize, ArenaError>;

  fn total(header: &Header<'_>) -> Result<usize, ArenaError>;

  fn overhead(header: &Header<'_>) -> Result<usize, ArenaError>;
}

/// Calls a [`Policy`] function on the implementation selected by `$kind`.
macro_rules! dispatch {
  ($kind:expr, $method:ident($($arg:expr),* $(,)?)) => {
    match $kind {
      $crate::strategy::Strategy::List => {
        <$crate::list::FreeList as $crate::strategy::Policy>::$method($($arg),*)
      }
      $crate::strategy::Strategy::NoFree => {
        <$crate::bump::NoFree as $crate::strategy::Policy>::$method($($arg),*)
      }
      $crate::strategy::Strategy::Fail => {
        <$crate::strategy::FailAlways as $crate::strategy::Policy>::$method($($arg),*)
      }
    }
  };
}

pub(crate) use dispatch;

/// Refuses every request.
pub(crate) struct FailAlways;

impl Policy for FailAlways {
  fn init(
    _header: &mut Header<'_>,
    _base: NonNull<u8>,
  ) {
  }

  fn alloc(
    _header: &mut Header<'_>,
    _base: NonNull<u8>,
    size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    Err(ArenaError::Exhausted { requested: size })
  }

  unsafe fn free(
    _header: &mut Header<'_>,
    _base: NonNull<u8>,
    _ptr: NonNull<u8>,
    _size: usize,
  ) -> Result<(), ArenaError> {
    Err(ArenaError::Unsupported(Strategy::Fail))
  }

  unsafe fn grow(
    _header: &mut Header<'_>,
    _base: NonNull<u8>,
    _ptr: NonNull<u8>,
    _old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    Err(ArenaError::Exhausted { requested: new_size })
  }

  fn is_allocated(
    _header: &Header<'_>,
    _base: NonNull<u8>,
    _offset: usize,
  ) -> bool {
    false
  }

  fn max_allocatable(
    _header: &Header<'_>,
    _base: NonNull<u8>,
  ) -> Result<usize, ArenaError> {
    Ok(0)
  }

  fn free_bytes(_header: &Header<'_>) -> Result<usize, ArenaError> {
    Err(ArenaError::Unsupported(Strategy::Fail))
  }

  fn total(_header: &Header<'_>) -> Result<usize, ArenaError> {
    Err(ArenaError::Unsupported(Strategy::Fail))
  }

  fn overhead(_header: &Header<'_>) -> Result<usize, ArenaError> {
    Err(ArenaError::Unsupported(Strategy::Fail))
  }
}
