//! Built-in self-test run by the command-line driver.
//!
//! The checks reformat a caller-supplied scratch buffer once per scenario,
//! so the buffer's previous contents are destroyed.

use thiserror::Error;

use crate::{
  align::{ALIGNMENT, align_up},
  arena::Arena,
  error::{ArenaError, FormatError},
  header::MIN_ARENA_SIZE,
  strategy::Strategy,
};

/// Smallest scratch buffer [`run`] accepts.
pub const SCRATCH_SIZE: usize = 4 * MIN_ARENA_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("self-test check `{check}` failed")]
pub struct SelfTestFailure {
  pub check: &'static str,
}

fn ensure(
  ok: bool,
  check: &'static str,
) -> Result<(), SelfTestFailure> {
  if ok { Ok(()) } else { Err(SelfTestFailure { check }) }
}

/// Runs every check against `scratch`.
pub fn run(scratch: &mut [u8]) -> Result<(), SelfTestFailure> {
  ensure(scratch.len() >= SCRATCH_SIZE, "scratch buffer size")?;

  alignment()?;
  undersized(scratch)?;
  for strategy in [Strategy::List, Strategy::NoFree, Strategy::Fail] {
    format_round_trip(scratch, strategy)?;
  }
  no_free(scratch)?;
  list_coalescing(scratch)?;
  fail_always(scratch)?;

  tracing::info!("self-test passed");
  Ok(())
}

fn alignment() -> Result<(), SelfTestFailure> {
  ensure(align_up(0) == 0, "align_up(0)")?;
  ensure(align_up(1) == ALIGNMENT, "align_up(1)")?;
  ensure(align_up(ALIGNMENT - 1) == ALIGNMENT, "align_up(ALIGNMENT - 1)")?;
  ensure(align_up(ALIGNMENT) == ALIGNMENT, "align_up(ALIGNMENT)")?;
  ensure(align_up(ALIGNMENT + 1) == 2 * ALIGNMENT, "align_up(ALIGNMENT + 1)")
}

fn undersized(scratch: &mut [u8]) -> Result<(), SelfTestFailure> {
  let short = &mut scratch[..MIN_ARENA_SIZE - 1];
  let rejected = matches!(
    Arena::format(short, Strategy::List),
    Err(FormatError::BufferTooSmall { .. })
  );
  ensure(rejected, "format rejects undersized buffers")
}

fn format_round_trip(
  scratch: &mut [u8],
  strategy: Strategy,
) -> Result<(), SelfTestFailure> {
  let range = scratch.as_ptr_range();
  let mut arena = Arena::format(scratch, strategy).map_err(|_| SelfTestFailure { check: "format" })?;
  let at = arena.as_ptr();
  ensure(range.contains(&at), "handle lies inside the buffer")?;

  arena
    .reformat(strategy)
    .map_err(|_| SelfTestFailure { check: "reformat" })?;
  ensure(arena.as_ptr() == at, "reformat keeps the handle address")
}

fn no_free(scratch: &mut [u8]) -> Result<(), SelfTestFailure> {
  let mut arena = Arena::format(scratch, Strategy::NoFree).map_err(|_| SelfTestFailure { check: "format no-free" })?;

  let ptr = arena.alloc(24).map_err(|_| SelfTestFailure { check: "no-free alloc" })?;
  let before = arena.max_allocatable();
  let refused = unsafe { arena.free(ptr, 24) };
  ensure(
    refused == Err(ArenaError::Unsupported(Strategy::NoFree)),
    "no-free refuses to free",
  )?;
  ensure(arena.max_allocatable() == before, "refused free leaves capacity unchanged")
}

fn list_coalescing(scratch: &mut [u8]) -> Result<(), SelfTestFailure> {
  let mut arena = Arena::format(scratch, Strategy::List).map_err(|_| SelfTestFailure { check: "format list" })?;
  let full = arena.max_allocatable().map_err(|_| SelfTestFailure { check: "list capacity" })?;

  let mut blocks = [None; 3];
  for (slot, size) in blocks.iter_mut().zip([40, 8, 100]) {
    *slot = Some((arena.alloc(size).map_err(|_| SelfTestFailure { check: "list alloc" })?, size));
  }

  for index in [1, 0, 2] {
    if let Some((ptr, size)) = blocks[index] {
      unsafe { arena.free(ptr, size) }.map_err(|_| SelfTestFailure { check: "list free" })?;
    }
  }

  ensure(arena.max_allocatable() == Ok(full), "list coalesces back to one block")?;
  ensure(arena.alloc(full).is_ok(), "list serves the whole region after coalescing")
}

fn fail_always(scratch: &mut [u8]) -> Result<(), SelfTestFailure> {
  let mut arena = Arena::format(scratch, Strategy::Fail).map_err(|_| SelfTestFailure { check: "format fail" })?;

  ensure(arena.alloc(1).is_err(), "fail strategy refuses allocations")?;
  ensure(arena.max_allocatable() == Ok(0), "fail strategy reports no capacity")?;
  ensure(arena.fault().is_none(), "fail strategy does not poison")
}
