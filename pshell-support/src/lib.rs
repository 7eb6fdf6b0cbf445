#![allow(clippy::len_without_is_empty)]

//! Ambient infrastructure shared by the `pshell-*` crates: logging
//! bootstrap, timestamp helpers and search-path resolution for the
//! `server.option`/`control.option` config files.

pub mod logging;
pub mod paths;
pub mod time;

pub use slog::Logger;
