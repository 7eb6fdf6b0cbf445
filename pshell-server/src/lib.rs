//! PSHELL shell server: command registry, argument utilities, the four
//! transport kinds, the interactive terminal line editor, payload-size
//! negotiation, dispatch, and server/startup/batch file configuration.

pub mod args;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod payload;
pub mod registry;
pub mod server_loop;
pub mod terminal;
pub mod transport;

pub use dispatch::{Identity, Server};
pub use error::ServerError;
pub use payload::GrowthPolicy;
pub use registry::{Callback, Command, FindResult, Registry, RegistryError};
pub use transport::ServerKind;
