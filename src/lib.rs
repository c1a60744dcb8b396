//! # rarena - An Arena Allocator Living Inside Your Buffer
//!
//! This crate formats a caller-supplied byte buffer into a self-describing
//! **arena** and then serves allocation requests out of that buffer alone.
//! Once formatted, no call reaches a system heap: the bookkeeping lives in a
//! header at the front of the buffer, and every bound in it is an offset.
//!
//! ## Overview
//!
//! ```text
//!   Formatted Buffer:
//!
//!   ┌───┬──────────────────┬──────────────────────────────────────────────┐
//!   │pad│      Header      │               Working Region                 │
//!   │   │ magic, strategy, │                                              │
//!   │   │ fault latch,     │   allocations served by the active strategy  │
//!   │   │ bounds, counters │                                              │
//!   └───┴──────────────────┴──────────────────────────────────────────────┘
//!       ▲                  ▲                                              ▲
//!       │                  │                                              │
//!   Arena handle     align_up(header end)                          buffer end
//!   (aligned base)
//! ```
//!
//! ## Strategies
//!
//! | Strategy             | allocate           | free       | resize           |
//! |----------------------|--------------------|------------|------------------|
//! | [`Strategy::List`]   | next-fit free list | coalescing | in place or move |
//! | [`Strategy::NoFree`] | bump pointer       | refused    | shrink only      |
//! | [`Strategy::Fail`]   | always fails       | refused    | always fails     |
//!
//! The list strategy keeps free blocks on an address-ordered circular list.
//! Each block starts with a boundary tag:
//!
//! ```text
//!   Single Allocation (list strategy):
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Boundary Tag       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N units   │  │  ┌──────────────────────────┐  │
//!   │  │ next: free link │  │  │  (N - 1) * UNIT bytes    │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │       16 bytes        │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rarena
//!   ├── align     - ALIGNMENT, align_up and the align! macro
//!   ├── arena     - Arena handle: format, dispatch, introspection
//!   ├── block     - Boundary tag of the list strategy (internal)
//!   ├── bump      - No-free strategy (internal)
//!   ├── error     - FormatError, ArenaError, Fault
//!   ├── header    - In-buffer control block (internal)
//!   ├── list      - Coalescing free-list strategy (internal)
//!   ├── selftest  - Built-in self-test suite
//!   ├── strategy  - Strategy selector and policy dispatch
//!   └── trace     - Diagnostic hook and the tracing bridge
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rarena::{Arena, Strategy};
//!
//! let mut buf = vec![0u8; 4096];
//! let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();
//!
//! let ptr = arena.alloc(64).unwrap();
//! assert!(arena.is_allocated(ptr.as_ptr()).unwrap());
//!
//! unsafe { arena.free(ptr, 64).unwrap() };
//! assert!(!arena.is_allocated(ptr.as_ptr()).unwrap());
//! ```
//!
//! ## Errors
//!
//! Corruption of the header (bad canary, unknown strategy tag, impossible
//! counters) panics. Misuse that the arena can detect, such as freeing a
//! pointer it never handed out, sets the arena's error latch: every later
//! operation fails with [`ArenaError::Poisoned`] until [`Arena::reformat`].
//! Running out of space never poisons.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: the handle is neither `Send` nor `Sync`
//! - **Fixed size**: an arena never grows past its buffer
//! - **Not a general-purpose allocator**: searches are linear in free blocks

pub mod align;
mod arena;
mod block;
mod bump;
mod error;
mod header;
mod list;
pub mod selftest;
mod strategy;
pub mod trace;

pub use arena::Arena;
pub use block::UNIT;
pub use error::{ArenaError, Fault, FormatError, ParseStrategyError};
pub use header::{HEADER_SIZE, MIN_ARENA_SIZE};
pub use strategy::Strategy;
pub use trace::{Record, Trace, TraceError, TracingSink};
