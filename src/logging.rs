//! Process-wide structured logging, built once at startup.
//!
//! Grounded on `flux::logging`'s intent (a `sloggers`-built terminal logger
//! wrapping `slog`), completed here into something that actually builds a
//! working logger rather than leaving it as a config-parsing stub.

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

pub use slog::Logger;

/// Builds a terminal logger at the given severity. Every component holds a
/// child of this logger tagged with its own name.
pub fn root_logger(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().expect("failed to construct root logger")
}

/// A root logger that discards everything; used by tests and anywhere the
/// caller doesn't want log noise.
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
