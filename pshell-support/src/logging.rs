//! Logging bootstrap. PSHELL itself never calls `println!` for diagnostics -
//! every subsystem is handed a `slog::Logger` and writes through it, so the
//! host program controls where diagnostics actually land.

use slog::o;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Severity gate for the process-wide diagnostic sink (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    fn to_severity(self) -> Severity {
        match self {
            LogLevel::Error => Severity::Error,
            LogLevel::Warning => Severity::Warning,
            LogLevel::Info => Severity::Info,
            LogLevel::Debug => Severity::Debug,
        }
    }
}

/// Build a terminal-backed logger at the requested severity. This is the
/// default sink a host program gets if it does not supply its own
/// `slog::Logger`.
pub fn terminal_logger(level: LogLevel) -> slog::Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level.to_severity());
    builder.destination(Destination::Stderr);

    match builder.build() {
        Ok(logger) => logger.new(o!("component" => "pshell")),
        Err(_) => slog::Logger::root(slog::Discard, o!()),
    }
}

/// A logger that discards everything, for tests and embedders that wire up
/// their own sink externally.
pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}
