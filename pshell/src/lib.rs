pub mod host;

pub use host::{Shell, ShellHandle, ShellOptions};

pub use pshell_control::{CommandReply, ControlClient, ControlError, ResultCode, Sid, INVALID_SID, UNIX_CONTROL};
pub use pshell_server::transport::ServerKind;
pub use pshell_server::{Callback, GrowthPolicy, Identity, Server, ServerError};
pub use pshell_trace::{Control as TraceControl, TraceError, TraceFilter};
