//! Diagnostic hook.
//!
//! An arena reports notable events (failed allocations, refused frees) and
//! the fault that poisons it to an optional caller-owned [`Trace`] sink. A
//! sink that returns [`TraceError`] poisons the arena.

use std::fmt;

use thiserror::Error;

/// Failure reported by a [`Trace`] sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("trace sink failed")]
pub struct TraceError;

/// One diagnostic event.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
  fatal: bool,
  site: &'static str,
  line: u32,
  args: fmt::Arguments<'a>,
}

impl<'a> Record<'a> {
  pub(crate) fn new(
    fatal: bool,
    site: &'static str,
    line: u32,
    args: fmt::Arguments<'a>,
  ) -> Self {
    Self { fatal, site, line, args }
  }

  /// `true` when this event poisoned the arena.
  pub fn is_fatal(&self) -> bool {
    self.fatal
  }

  /// Module that raised the event.
  pub fn site(&self) -> &'static str {
    self.site
  }

  pub fn line(&self) -> u32 {
    self.line
  }

  pub fn args(&self) -> fmt::Arguments<'a> {
    self.args
  }
}

impl fmt::Display for Record<'_> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{}:{}: {}", self.site, self.line, self.args)
  }
}

/// Sink for arena diagnostics.
///
/// Invoked synchronously from inside arena operations and never concurrently
/// with itself for one arena.
pub trait Trace {
  fn trace(
    &mut self,
    record: &Record<'_>,
  ) -> Result<(), TraceError>;
}

impl<F> Trace for F
where
  F: FnMut(&Record<'_>) -> Result<(), TraceError>,
{
  fn trace(
    &mut self,
    record: &Record<'_>,
  ) -> Result<(), TraceError> {
    self(record)
  }
}

/// Forwards records to the `tracing` ecosystem.
///
/// Fatal records are emitted at `ERROR`, everything else at `DEBUG`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Trace for TracingSink {
  fn trace(
    &mut self,
    record: &Record<'_>,
  ) -> Result<(), TraceError> {
    if record.is_fatal() {
      tracing::error!(site = record.site(), line = record.line(), "{}", record.args());
    } else {
      tracing::debug!(site = record.site(), line = record.line(), "{}", record.args());
    }
    Ok(())
  }
}

/// Reports a non-fatal event through [`Header::emit`](crate::header::Header::emit).
macro_rules! note {
  ($header:expr, $($arg:tt)+) => {
    $header.emit(None, module_path!(), line!(), format_args!($($arg)+))
  };
}

/// Latches `$fault` on the header and evaluates to the resulting error.
macro_rules! poison {
  ($header:expr, $fault:expr, $($arg:tt)+) => {
    match $header.emit(Some($fault), module_path!(), line!(), format_args!($($arg)+)) {
      Err(err) => err,
      Ok(()) => $crate::error::ArenaError::Poisoned($fault),
    }
  };
}

pub(crate) use {note, poison};
