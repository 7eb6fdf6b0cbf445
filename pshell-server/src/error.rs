//! Top-level error type for operations that bind a transport or drive a
//! server loop (spec.md §7, §10.2) - as opposed to `RegistryError`, which is
//! scoped to command registration.

use crate::registry::RegistryError;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum ServerError {
    Io(io::Error),
    Registry(RegistryError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Io(err) => write!(f, "{}", err),
            ServerError::Registry(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> ServerError {
        ServerError::Io(err)
    }
}

impl From<RegistryError> for ServerError {
    fn from(err: RegistryError) -> ServerError {
        ServerError::Registry(err)
    }
}
