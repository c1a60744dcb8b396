use std::{env, io, process::ExitCode, ptr::NonNull, slice};

use rarena::{Arena, Strategy, TracingSink, selftest};
use tracing_subscriber::EnvFilter;

const DEFAULT_ARENA_SIZE: usize = 64 * 1024;

/// Anonymous private mapping used as the demonstration arena buffer.
struct Mapping {
  addr: NonNull<u8>,
  len: usize,
}

impl Mapping {
  fn anonymous(len: usize) -> io::Result<Self> {
    let addr = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if addr == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    let addr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))?;
    Ok(Self { addr, len })
  }

  fn as_mut_slice(&mut self) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(self.addr.as_ptr(), self.len) }
  }
}

impl Drop for Mapping {
  fn drop(&mut self) {
    unsafe { libc::munmap(self.addr.as_ptr().cast(), self.len) };
  }
}

fn arena_size() -> usize {
  let size = match env::var("ARENA_SIZE") {
    Ok(value) => value.parse().unwrap_or_else(|_| {
      tracing::warn!(%value, "ignoring unparsable ARENA_SIZE");
      DEFAULT_ARENA_SIZE
    }),
    Err(_) => DEFAULT_ARENA_SIZE,
  };
  size.max(selftest::SCRATCH_SIZE)
}

fn arena_strategy() -> Strategy {
  match env::var("ARENA_STRATEGY") {
    Ok(value) => value.parse().unwrap_or_else(|err| {
      tracing::warn!(%err, "falling back to the default strategy");
      Strategy::default()
    }),
    Err(_) => Strategy::default(),
  }
}

/// Formats the buffer with the configured strategy and exercises it once.
fn demo(
  buf: &mut [u8],
  strategy: Strategy,
) {
  let mut sink = TracingSink;
  let mut arena = match Arena::format(buf, strategy) {
    Ok(arena) => arena,
    Err(err) => {
      tracing::warn!(%err, "demo arena could not be formatted");
      return;
    }
  };
  if let Err(err) = arena.set_trace(Some(&mut sink)) {
    tracing::warn!(%err, "could not attach trace sink");
  }

  let first = arena.alloc(128);
  let second = arena.alloc(512);
  if let Ok(ptr) = first {
    let _ = unsafe { arena.free(ptr, 128) };
  }
  if let Ok(ptr) = second {
    let _ = unsafe { arena.resize(ptr, 512, 2048) };
  }

  tracing::info!(
    %strategy,
    total = ?arena.total(),
    free = ?arena.free_bytes(),
    overhead = ?arena.overhead(),
    max_allocatable = ?arena.max_allocatable(),
    "demo arena statistics"
  );
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  println!("rarena arena allocator");
  println!("version={}", env!("CARGO_PKG_VERSION"));

  let mut mapping = match Mapping::anonymous(arena_size()) {
    Ok(mapping) => mapping,
    Err(err) => {
      tracing::error!(%err, "could not map the arena buffer");
      return ExitCode::FAILURE;
    }
  };

  if let Err(err) = selftest::run(mapping.as_mut_slice()) {
    println!("internal tests failed: {err}");
    return ExitCode::FAILURE;
  }

  demo(mapping.as_mut_slice(), arena_strategy());

  println!("tests passed");
  ExitCode::SUCCESS
}
