//! PSHELL control client: connects to remote PSHELL servers over UDP or
//! Unix datagrams, sends commands with send-and-wait semantics, and
//! supports multicast fan-out to groups of sessions.

pub mod client;
pub mod config;
pub mod error;
pub mod multicast;
pub mod session;

pub use client::{CommandReply, ControlClient};
pub use error::{ControlError, ResultCode};
pub use session::{Sid, INVALID_SID, UNIX_CONTROL};
