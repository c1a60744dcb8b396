//! Circular free list with boundary tags and coalescing.
//!
//! Free blocks form a singly-linked ring sorted by address. The header
//! keeps a roving index into the ring; allocation searches from the block
//! after the rover (next-fit) and carves requests off the tail of the first
//! block large enough. Freeing walks the ring to the insertion point and
//! merges the block with its lower and upper neighbours when they touch.
//!
//! ```text
//!   working region, in UNIT-sized units
//!
//!   ┌─────┬───────────┬─────┬───────┬─────┬─────────────────────┐
//!   │ tag │ free      │ tag │ used  │ tag │ free                │
//!   └─────┴───────────┴─────┴───────┴─────┴─────────────────────┘
//!     ▲                               ▲ │
//!     └───────────── next ────────────┘ └──► next (wraps to lowest)
//! ```

use std::ptr::{self, NonNull};

use crate::{
  block::{Tag, UNIT},
  error::{ArenaError, Fault},
  header::Header,
  strategy::Policy,
  trace::poison,
};

/// Marks an empty ring, and the `next` field of allocated blocks.
pub(crate) const NIL: usize = usize::MAX;

/// State of the list strategy. Sizes and indices count units, not bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListState {
  /// Units managed by the list.
  pub units: usize,
  /// Free block the next search starts after, or [`NIL`].
  pub rover: usize,
  pub free_units: usize,
  pub free_blocks: usize,
  pub live_blocks: usize,
}

impl Default for ListState {
  fn default() -> Self {
    Self {
      units: 0,
      rover: NIL,
      free_units: 0,
      free_blocks: 0,
      live_blocks: 0,
    }
  }
}

/// Walks the ring once, starting after the rover, yielding `(prev, index, tag)`.
struct Ring {
  base: NonNull<u8>,
  units: usize,
  start: usize,
  prev: usize,
  steps: usize,
  done: bool,
}

impl Ring {
  fn new(
    state: &ListState,
    base: NonNull<u8>,
  ) -> Self {
    Self {
      base,
      units: state.units,
      start: state.rover,
      prev: state.rover,
      steps: 0,
      done: state.rover == NIL,
    }
  }
}

impl Iterator for Ring {
  type Item = (usize, usize, Tag);

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    let prev = self.prev;
    let index = unsafe { Tag::read(self.base, prev) }.next;
    assert!(index < self.units, "free list link {index} points past the working region");

    self.steps += 1;
    assert!(self.steps <= self.units, "free list does not close into a ring");

    let tag = unsafe { Tag::read(self.base, index) };
    assert!(
      tag.size > 0 && tag.size <= self.units - index,
      "free block {index} has an implausible size {}",
      tag.size
    );

    self.prev = index;
    self.done = index == self.start;
    Some((prev, index, tag))
  }
}

pub(crate) struct FreeList;

impl FreeList {
  /// Resolves a user pointer to its block index and tag, poisoning the arena
  /// when the pointer cannot name a block.
  fn locate(
    header: &mut Header<'_>,
    base: NonNull<u8>,
    ptr: NonNull<u8>,
  ) -> Result<(usize, Tag), ArenaError> {
    let units = header.list.units;

    let Some(offset) = header.offset_of(base, ptr.as_ptr()).filter(|offset| *offset < units * UNIT) else {
      return Err(poison!(header, Fault::OutOfRange, "{:p} lies outside the managed units", ptr));
    };
    if offset % UNIT != 0 || offset < UNIT {
      return Err(poison!(header, Fault::Misaligned, "{:p} is not the start of a block", ptr));
    }

    let index = offset / UNIT - 1;
    let tag = unsafe { Tag::read(base, index) };
    if tag.size == 0 || tag.size > units - index {
      return Err(poison!(
        header,
        Fault::CorruptTag,
        "block {} records an impossible size of {} units",
        index,
        tag.size
      ));
    }

    Ok((index, tag))
  }

  fn user_ptr(
    base: NonNull<u8>,
    index: usize,
  ) -> NonNull<u8> {
    unsafe { base.add((index + 1) * UNIT) }
  }
}

impl Policy for FreeList {
  fn init(
    header: &mut Header<'_>,
    base: NonNull<u8>,
  ) {
    let units = header.working_len() / UNIT;

    header.list = ListState {
      units,
      ..ListState::default()
    };

    if units > 0 {
      unsafe { Tag::new(units, 0).write(base, 0) };
      header.list.rover = 0;
      header.list.free_units = units;
      header.list.free_blocks = 1;
    }
  }

  fn alloc(
    header: &mut Header<'_>,
    base: NonNull<u8>,
    size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let exhausted = ArenaError::Exhausted { requested: size };
    let need = Tag::units_for(size);
    if need > header.list.free_units {
      return Err(exhausted);
    }

    let state = &mut header.list;
    let Some((prev, index, tag)) = Ring::new(state, base).find(|(_, _, tag)| tag.size >= need) else {
      return Err(exhausted);
    };

    let block = if tag.size == need {
      if prev == index {
        state.rover = NIL;
      } else {
        let mut before = unsafe { Tag::read(base, prev) };
        before.next = tag.next;
        unsafe { before.write(base, prev) };
        state.rover = prev;
      }
      state.free_blocks -= 1;
      index
    } else {
      let remaining = tag.size - need;
      unsafe { Tag::new(remaining, tag.next).write(base, index) };
      state.rover = prev;
      index + remaining
    };

    unsafe { Tag::new(need, NIL).write(base, block) };
    state.free_units -= need;
    state.live_blocks += 1;
    tracing::trace!(block, units = need, "list allocation");

    Ok(Self::user_ptr(base, block))
  }

  unsafe fn free(
    header: &mut Header<'_>,
    base: NonNull<u8>,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<(), ArenaError> {
    let (block, tag) = Self::locate(header, base, ptr)?;
    if size > 0 && Tag::units_for(size) > tag.size {
      return Err(poison!(
        header,
        Fault::CorruptTag,
        "free of {} bytes from block {} of {} units",
        size,
        block,
        tag.size
      ));
    }
    if header.list.live_blocks == 0 {
      return Err(poison!(header, Fault::DoubleFree, "free of block {} with no live blocks", block));
    }

    let state = header.list;
    let end = block + tag.size;

    if state.rover == NIL {
      unsafe { Tag::new(tag.size, block).write(base, block) };
      header.list.rover = block;
      header.list.free_blocks = 1;
      header.list.free_units += tag.size;
      header.list.live_blocks -= 1;
      tracing::trace!(block, units = tag.size, "list free into empty ring");
      return Ok(());
    }

    // Find the free block `lower` after which `block` belongs: either the
    // gap between two neighbours, or the wrap point of the ring.
    let mut found = None;
    let mut overlap = false;
    for (_, index, lower) in Ring::new(&state, base) {
      if block >= index && block < index + lower.size {
        overlap = true;
        break;
      }
      let upper = lower.next;
      let between = index < block && block < upper;
      let wraps = index >= upper && (block > index || block < upper);
      if between || wraps {
        found = Some((index, lower));
        break;
      }
    }
    if overlap {
      return Err(poison!(header, Fault::DoubleFree, "block {} is already free", block));
    }
    let Some((lower, lower_tag)) = found else {
      panic!("free list ring has no insertion point for block {block}");
    };

    let upper = lower_tag.next;
    let upper_tag = unsafe { Tag::read(base, upper) };
    if block >= upper && block < upper + upper_tag.size {
      return Err(poison!(header, Fault::DoubleFree, "block {} is already free", block));
    }
    if block < upper && end > upper {
      return Err(poison!(
        header,
        Fault::CorruptTag,
        "block {} of {} units overruns free block {}",
        block,
        tag.size,
        upper
      ));
    }

    // Both merge decisions are made before anything is written.
    let join_lower = lower < block && lower + lower_tag.size == block;
    let join_upper = block < upper && end == upper;
    let state = &mut header.list;

    match (join_lower, join_upper) {
      (false, false) => unsafe {
        Tag::new(tag.size, upper).write(base, block);
        Tag::new(lower_tag.size, block).write(base, lower);
        state.rover = lower;
        state.free_blocks += 1;
      },
      (false, true) if lower == upper => unsafe {
        Tag::new(tag.size + upper_tag.size, block).write(base, block);
        state.rover = block;
      },
      (false, true) => unsafe {
        Tag::new(tag.size + upper_tag.size, upper_tag.next).write(base, block);
        Tag::new(lower_tag.size, block).write(base, lower);
        state.rover = lower;
      },
      (true, false) => unsafe {
        Tag::new(lower_tag.size + tag.size, lower_tag.next).write(base, lower);
        state.rover = lower;
      },
      (true, true) => unsafe {
        Tag::new(lower_tag.size + tag.size + upper_tag.size, upper_tag.next).write(base, lower);
        state.rover = lower;
        state.free_blocks -= 1;
      },
    }

    state.free_units += tag.size;
    state.live_blocks -= 1;
    tracing::trace!(block, units = tag.size, join_lower, join_upper, "list free");

    Ok(())
  }

  unsafe fn grow(
    header: &mut Header<'_>,
    base: NonNull<u8>,
    ptr: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let (block, tag) = Self::locate(header, base, ptr)?;
    let need = Tag::units_for(new_size);
    if need <= tag.size {
      return Ok(ptr);
    }

    // Absorb the free block directly above when it covers the shortfall.
    let above = block + tag.size;
    let extra = need - tag.size;
    let neighbour = Ring::new(&header.list, base).find(|(_, index, _)| *index == above);

    if let Some((prev, index, next_tag)) = neighbour.filter(|(_, _, next_tag)| next_tag.size >= extra) {
      let state = &mut header.list;

      if next_tag.size == extra {
        if prev == index {
          state.rover = NIL;
        } else {
          let mut before = unsafe { Tag::read(base, prev) };
          before.next = next_tag.next;
          unsafe { before.write(base, prev) };
          state.rover = prev;
        }
        state.free_blocks -= 1;
      } else {
        let rest = index + extra;
        if prev == index {
          unsafe { Tag::new(next_tag.size - extra, rest).write(base, rest) };
          state.rover = rest;
        } else {
          unsafe {
            Tag::new(next_tag.size - extra, next_tag.next).write(base, rest);
            let mut before = Tag::read(base, prev);
            before.next = rest;
            before.write(base, prev);
          }
          state.rover = prev;
        }
      }

      unsafe { Tag::new(need, NIL).write(base, block) };
      state.free_units -= extra;
      tracing::trace!(block, units = need, "list grow in place");
      return Ok(ptr);
    }

    let fresh = Self::alloc(header, base, new_size)?;
    let payload = (tag.size - 1) * UNIT;
    unsafe {
      ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), old_size.min(payload));
      Self::free(header, base, ptr, 0)?;
    }

    Ok(fresh)
  }

  fn is_allocated(
    header: &Header<'_>,
    base: NonNull<u8>,
    offset: usize,
  ) -> bool {
    let unit = offset / UNIT;
    if unit >= header.list.units {
      return false;
    }

    !Ring::new(&header.list, base).any(|(_, index, tag)| unit >= index && unit < index + tag.size)
  }

  fn max_allocatable(
    header: &Header<'_>,
    base: NonNull<u8>,
  ) -> Result<usize, ArenaError> {
    let largest = Ring::new(&header.list, base).map(|(_, _, tag)| tag.size).max();

    Ok(largest.map_or(0, |units| (units - 1) * UNIT))
  }

  fn free_bytes(header: &Header<'_>) -> Result<usize, ArenaError> {
    Ok(header.list.free_units * UNIT)
  }

  fn total(header: &Header<'_>) -> Result<usize, ArenaError> {
    Ok(header.list.units * UNIT)
  }

  fn overhead(header: &Header<'_>) -> Result<usize, ArenaError> {
    let state = &header.list;
    let tags = (state.free_blocks + state.live_blocks) * UNIT;

    Ok(header.buf_len() - state.units * UNIT + tags)
  }
}
