use std::{cell::RefCell, ptr::NonNull};

use rarena::{
  Arena, ArenaError, Fault, FormatError, HEADER_SIZE, MIN_ARENA_SIZE, Record, Strategy, TraceError, UNIT,
  align::{ALIGNMENT, align_up},
};

const STRATEGIES: [Strategy; 3] = [Strategy::List, Strategy::NoFree, Strategy::Fail];

#[test]
fn format_minimum_buffer_with_every_strategy() {
  for strategy in STRATEGIES {
    let mut buf = vec![0u8; MIN_ARENA_SIZE];
    let range = buf.as_ptr_range();

    let mut arena = Arena::format(&mut buf, strategy).unwrap();
    let at = arena.as_ptr();
    assert!(range.contains(&at), "{strategy} handle outside the buffer");

    arena.reformat(strategy).unwrap();
    assert_eq!(arena.as_ptr(), at);
    assert_eq!(arena.strategy(), strategy);
  }
}

#[test]
fn reformat_switches_strategy_in_place() {
  let mut buf = vec![0u8; 2048];
  let mut arena = Arena::format(&mut buf, Strategy::Fail).unwrap();
  let at = arena.as_ptr();

  arena.reformat(Strategy::NoFree).unwrap();
  assert_eq!(arena.as_ptr(), at);
  assert!(arena.alloc(64).is_ok());

  arena.reformat(Strategy::List).unwrap();
  assert_eq!(arena.as_ptr(), at);
  assert_eq!(arena.free_bytes(), arena.total());
}

#[test]
fn format_rejects_undersized_buffers() {
  for strategy in STRATEGIES {
    for len in [0, 1, HEADER_SIZE, MIN_ARENA_SIZE - 1] {
      let mut buf = vec![0u8; len];
      assert_eq!(
        Arena::format(&mut buf, strategy).unwrap_err(),
        FormatError::BufferTooSmall {
          len,
          min: MIN_ARENA_SIZE
        }
      );
    }
  }
  assert_eq!(MIN_ARENA_SIZE, 2 * (HEADER_SIZE + ALIGNMENT));
}

#[test]
fn format_tolerates_unaligned_buffers() {
  let mut buf = vec![0u8; 1024 + 1];
  let arena = Arena::format(&mut buf[1..], Strategy::List).unwrap();

  assert_eq!(arena.as_ptr() as usize % ALIGNMENT, 0);
  assert!(arena.working_len() > 1024 - ALIGNMENT - align_up(HEADER_SIZE));
}

#[test]
fn no_free_consumption_is_monotonic() {
  let mut buf = vec![0u8; 2048];
  let mut arena = Arena::format(&mut buf, Strategy::NoFree).unwrap();
  let working = arena.working_len();

  let mut consumed = working - arena.max_allocatable().unwrap();
  let mut live = Vec::new();
  for size in [1, 17, 3, 64, 5, 200] {
    live.push((arena.alloc(size).unwrap(), size));
    let now = working - arena.max_allocatable().unwrap();
    assert!(now >= consumed);
    consumed = now;
  }

  for (ptr, size) in live {
    let before = arena.max_allocatable();
    assert_eq!(
      unsafe { arena.free(ptr, size) },
      Err(ArenaError::Unsupported(Strategy::NoFree))
    );
    assert_eq!(unsafe { arena.allocate(Some(ptr), size, 0) }, None);
    assert_eq!(arena.max_allocatable(), before);
  }
  assert_eq!(arena.fault(), None);
}

#[test]
fn no_free_exhaustion_does_not_poison() {
  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::NoFree).unwrap();
  let working = arena.working_len();

  assert_eq!(
    arena.alloc(working + 1),
    Err(ArenaError::Exhausted { requested: working + 1 })
  );
  assert_eq!(arena.fault(), None);

  let mut used = 0;
  while used + 48 <= working {
    let ptr = arena.alloc(48).unwrap();
    assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
    used = align_up(used + 48);
  }

  assert_eq!(arena.alloc(48), Err(ArenaError::Exhausted { requested: 48 }));
  assert_eq!(arena.fault(), None);

  let rest = arena.free_bytes().unwrap();
  assert!(rest < 48);
  assert_eq!(arena.max_allocatable(), Ok(rest));
  if rest > 0 {
    assert!(arena.alloc(rest).is_ok());
  }
  assert_eq!(arena.max_allocatable(), Ok(0));
}

#[test]
fn no_free_grow_is_refused() {
  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::NoFree).unwrap();

  let ptr = arena.alloc(16).unwrap();
  let before = arena.max_allocatable().unwrap();

  unsafe {
    assert_eq!(arena.allocate(Some(ptr), 16, 64), None);
    assert_eq!(arena.allocate(Some(ptr), 0, 32), None);
    assert_eq!(arena.allocate(Some(ptr), 16, 16), Some(ptr));
  }
  assert_eq!(arena.max_allocatable(), Ok(before));
  assert_eq!(arena.fault(), None);
  assert!(arena.alloc(16).is_ok());
}

#[test]
fn fail_strategy_refuses_everything() {
  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::Fail).unwrap();
  let bogus = NonNull::new(arena.as_ptr().cast_mut()).unwrap();

  unsafe {
    assert_eq!(arena.allocate(None, 0, 16), None);
    assert_eq!(arena.allocate(Some(bogus), 16, 32), None);
    assert_eq!(arena.allocate(Some(bogus), 16, 8), None);
    assert_eq!(arena.allocate(Some(bogus), 16, 0), None);
    assert_eq!(
      arena.resize(bogus, 16, 8),
      Err(ArenaError::Exhausted { requested: 8 })
    );
    assert_eq!(arena.free(bogus, 16), Err(ArenaError::Unsupported(Strategy::Fail)));
  }
  assert_eq!(arena.alloc(16), Err(ArenaError::Exhausted { requested: 16 }));

  assert_eq!(arena.max_allocatable(), Ok(0));
  assert_eq!(arena.free_bytes(), Err(ArenaError::Unsupported(Strategy::Fail)));
  assert_eq!(arena.total(), Err(ArenaError::Unsupported(Strategy::Fail)));
  assert_eq!(arena.overhead(), Err(ArenaError::Unsupported(Strategy::Fail)));
  assert_eq!(arena.fault(), None);
}

#[test]
fn list_three_way_coalescing_in_any_order() {
  let orders: [[usize; 3]; 4] = [[1, 0, 2], [0, 2, 1], [2, 1, 0], [1, 2, 0]];

  for order in orders {
    let mut buf = vec![0u8; 4096];
    let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();
    let full = arena.max_allocatable().unwrap();
    assert_eq!(full, 4096 - arena.overhead().unwrap());

    let sizes = [48, 16, 100];
    let blocks: Vec<_> = sizes.iter().map(|size| arena.alloc(*size).unwrap()).collect();

    for index in order {
      unsafe { arena.free(blocks[index], sizes[index]) }.unwrap();
    }

    assert_eq!(arena.max_allocatable(), Ok(full), "order {order:?}");
    assert_eq!(arena.max_allocatable(), Ok(arena.total().unwrap() - UNIT));
    assert_eq!(arena.free_bytes(), arena.total());

    let whole = arena.alloc(full).unwrap();
    assert!(arena.is_allocated(whole.as_ptr()).unwrap());
    assert_eq!(arena.max_allocatable(), Ok(0));
  }
}

#[test]
fn pointer_validity_follows_allocation_state() {
  let mut buf = vec![0u8; 2048];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();

  let ptr = arena.alloc(40).unwrap();
  assert_eq!(arena.is_in_range(ptr.as_ptr()), Ok(true));
  assert_eq!(arena.is_allocated(ptr.as_ptr()), Ok(true));

  unsafe { arena.free(ptr, 40) }.unwrap();
  assert_eq!(arena.is_in_range(ptr.as_ptr()), Ok(true));
  assert_eq!(arena.is_allocated(ptr.as_ptr()), Ok(false));
}

#[test]
fn no_free_validity_is_range_membership() {
  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::NoFree).unwrap();

  let ptr = arena.alloc(8).unwrap();
  assert_eq!(arena.is_in_range(ptr.as_ptr()), Ok(true));
  assert_eq!(arena.is_allocated(ptr.as_ptr()), Ok(true));
  assert_eq!(arena.is_allocated(arena.as_ptr()), Ok(false));
}

#[test]
fn one_past_the_end_is_in_range_but_never_allocated() {
  for strategy in [Strategy::List, Strategy::NoFree] {
    let mut buf = vec![0u8; 1024];
    let arena = Arena::format(&mut buf, strategy).unwrap();
    let end = buf_end(&arena);

    assert_eq!(arena.is_in_range(end), Ok(true));
    assert_eq!(arena.is_in_range(end.wrapping_add(1)), Ok(false));
    assert_eq!(arena.is_allocated(end), Ok(false));
    assert_eq!(arena.is_in_range(arena.as_ptr()), Ok(false));
  }
}

fn buf_end(arena: &Arena<'_>) -> *const u8 {
  // The working region ends where the buffer ends.
  let start = arena.as_ptr() as usize + align_up(HEADER_SIZE);
  (start + arena.working_len()) as *const u8
}

#[test]
fn invalid_free_poisons_until_reformat() {
  let mut buf = vec![0u8; 2048];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();

  let ptr = arena.alloc(32).unwrap();
  let inside = unsafe { ptr.add(UNIT) };
  assert_eq!(
    unsafe { arena.free(inside, 0) },
    Err(ArenaError::Poisoned(Fault::CorruptTag))
  );

  assert_eq!(arena.fault(), Some(Fault::CorruptTag));
  let poisoned = ArenaError::Poisoned(Fault::CorruptTag);
  assert_eq!(arena.alloc(8), Err(poisoned));
  assert_eq!(unsafe { arena.allocate(None, 0, 8) }, None);
  assert_eq!(arena.is_in_range(ptr.as_ptr()), Err(poisoned));
  assert_eq!(arena.is_allocated(ptr.as_ptr()), Err(poisoned));
  assert_eq!(arena.max_allocatable(), Err(poisoned));
  assert_eq!(arena.free_bytes(), Err(poisoned));
  assert_eq!(arena.total(), Err(poisoned));
  assert_eq!(arena.overhead(), Err(poisoned));
  assert_eq!(arena.set_trace(None), Err(poisoned));

  arena.reformat(Strategy::List).unwrap();
  assert_eq!(arena.fault(), None);
  assert!(arena.alloc(8).is_ok());
}

#[test]
fn double_free_poisons() {
  let mut buf = vec![0u8; 2048];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();

  let a = arena.alloc(32).unwrap();
  let _b = arena.alloc(32).unwrap();
  unsafe {
    arena.free(a, 32).unwrap();
    assert_eq!(arena.free(a, 32), Err(ArenaError::Poisoned(Fault::DoubleFree)));
  }
  assert_eq!(arena.alloc(8), Err(ArenaError::Poisoned(Fault::DoubleFree)));
}

#[test]
fn out_of_range_free_poisons() {
  let mut other = vec![0u8; 64];
  let foreign = NonNull::new(other.as_mut_ptr()).unwrap();

  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();

  assert_eq!(
    unsafe { arena.free(foreign, 8) },
    Err(ArenaError::Poisoned(Fault::OutOfRange))
  );
  assert!(unsafe { arena.allocate(None, 0, 8) }.is_none());
}

#[test]
fn trace_sink_sees_events_and_can_poison() {
  let records = RefCell::new(Vec::new());
  let mut sink = |record: &Record<'_>| -> Result<(), TraceError> {
    records.borrow_mut().push((record.is_fatal(), record.args().to_string()));
    if record.is_fatal() { Ok(()) } else { Err(TraceError) }
  };

  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();
  arena.set_trace(Some(&mut sink)).unwrap();

  let too_big = arena.working_len() * 2;
  assert_eq!(arena.alloc(too_big), Err(ArenaError::Poisoned(Fault::TraceFailed)));
  assert_eq!(arena.fault(), Some(Fault::TraceFailed));
  assert_eq!(arena.alloc(8), Err(ArenaError::Poisoned(Fault::TraceFailed)));

  let records = records.into_inner();
  assert_eq!(records.len(), 1);
  assert!(!records[0].0);
  assert!(records[0].1.contains(&too_big.to_string()));
}

#[test]
fn fatal_events_reach_the_sink_once() {
  let records = RefCell::new(Vec::new());
  let mut sink = |record: &Record<'_>| -> Result<(), TraceError> {
    records.borrow_mut().push((record.is_fatal(), record.site()));
    Ok(())
  };

  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();
  arena.set_trace(Some(&mut sink)).unwrap();

  let ptr = arena.alloc(16).unwrap();
  let misaligned = unsafe { ptr.add(3) };
  assert_eq!(
    unsafe { arena.free(misaligned, 0) },
    Err(ArenaError::Poisoned(Fault::Misaligned))
  );
  assert_eq!(
    unsafe { arena.free(ptr, 16) },
    Err(ArenaError::Poisoned(Fault::Misaligned))
  );

  let records = records.into_inner();
  assert_eq!(records, vec![(true, "rarena::list")]);
}

#[test]
fn list_resize_preserves_contents() {
  let mut buf = vec![0u8; 4096];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();

  let first = arena.alloc(24).unwrap();
  unsafe {
    for i in 0..24 {
      first.add(i).write(i as u8);
    }
  }
  let _pin = arena.alloc(8).unwrap();

  let grown = unsafe { arena.resize(first, 24, 300) }.unwrap();
  let shrunk = unsafe { arena.resize(grown, 300, 10) }.unwrap();

  assert_eq!(shrunk, grown);
  for i in 0..24 {
    assert_eq!(unsafe { grown.add(i).read() }, i as u8);
  }
  assert_eq!(arena.is_allocated(first.as_ptr()), Ok(false));
}

#[test]
fn list_grow_failure_keeps_original() {
  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();

  let ptr = arena.alloc(64).unwrap();
  let huge = arena.working_len() * 4;

  assert_eq!(
    unsafe { arena.resize(ptr, 64, huge) },
    Err(ArenaError::Exhausted { requested: huge })
  );
  assert_eq!(arena.is_allocated(ptr.as_ptr()), Ok(true));
  assert_eq!(arena.fault(), None);
}

#[test]
fn reformat_detaches_trace_sink() {
  let records = RefCell::new(Vec::new());
  let mut sink = |record: &Record<'_>| -> Result<(), TraceError> {
    records.borrow_mut().push(record.args().to_string());
    Ok(())
  };

  let mut buf = vec![0u8; 1024];
  let mut arena = Arena::format(&mut buf, Strategy::List).unwrap();
  arena.set_trace(Some(&mut sink)).unwrap();

  let too_big = arena.working_len() * 2;
  assert_eq!(arena.alloc(too_big), Err(ArenaError::Exhausted { requested: too_big }));
  assert_eq!(records.borrow().len(), 1);

  arena.reformat(Strategy::List).unwrap();
  assert_eq!(arena.alloc(too_big), Err(ArenaError::Exhausted { requested: too_big }));
  assert_eq!(arena.fault(), None);

  assert_eq!(records.into_inner().len(), 1);
}
