//! `pshell-trace`'s single error type (spec.md §7, §10.2): capacity and
//! registration failures, never anything that can occur on a hot
//! `is_filter_passed` call (that path only ever degrades to "filter does
//! not pass", it never errors).

use crate::levels::LevelError;
use crate::watch::InvalidWidth;
use std::fmt;

#[derive(Debug)]
pub enum TraceError {
    Level(LevelError),
    InvalidWatchWidth(u8),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Level(err) => write!(f, "{}", err),
            TraceError::InvalidWatchWidth(width) => write!(f, "watchpoint width {} is not one of 1, 2, 4, 8", width),
        }
    }
}

impl std::error::Error for TraceError {}

impl From<LevelError> for TraceError {
    fn from(err: LevelError) -> TraceError {
        TraceError::Level(err)
    }
}

impl From<InvalidWidth> for TraceError {
    fn from(err: InvalidWidth) -> TraceError {
        TraceError::InvalidWatchWidth(err.0)
    }
}
