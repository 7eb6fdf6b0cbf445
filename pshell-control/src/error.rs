use std::fmt;
use std::io;

/// Control-client result/error codes (spec.md §4.6). `CommandSuccess` /
/// `CommandNotFound` / `CommandInvalidArgCount` mirror the server's
/// control-reply codes (spec.md §6.1); the `Socket*` variants are raised
/// locally by the send-and-wait state machine and never appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    CommandSuccess,
    CommandNotFound,
    CommandInvalidArgCount,
    SocketSendFailure,
    SocketTimeout,
    SocketSelectFailure,
}

impl ResultCode {
    /// `getResponseString(code) -> name` (spec.md §4.6).
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::CommandSuccess => "commandSuccess",
            ResultCode::CommandNotFound => "commandNotFound",
            ResultCode::CommandInvalidArgCount => "commandInvalidArgCount",
            ResultCode::SocketSendFailure => "socketSendFailure",
            ResultCode::SocketTimeout => "socketTimeout",
            ResultCode::SocketSelectFailure => "socketSelectFailure",
        }
    }

    pub(crate) fn from_wire(msg_type: u8) -> ResultCode {
        match msg_type {
            pshell_wire::msg::COMMAND_NOT_FOUND => ResultCode::CommandNotFound,
            pshell_wire::msg::COMMAND_INVALID_ARG_COUNT => ResultCode::CommandInvalidArgCount,
            _ => ResultCode::CommandSuccess,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
pub enum ControlError {
    /// The SID does not name a connected session.
    InvalidSid,
    /// The session table is at its capacity invariant (spec.md §3, cap 100).
    TableFull,
    SocketSendFailure,
    SocketTimeout,
    SocketSelectFailure,
    Io(io::Error),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::InvalidSid => write!(f, "invalid SID"),
            ControlError::TableFull => write!(f, "control session table is full"),
            ControlError::SocketSendFailure => write!(f, "{}", ResultCode::SocketSendFailure),
            ControlError::SocketTimeout => write!(f, "{}", ResultCode::SocketTimeout),
            ControlError::SocketSelectFailure => write!(f, "{}", ResultCode::SocketSelectFailure),
            ControlError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<io::Error> for ControlError {
    fn from(err: io::Error) -> Self {
        ControlError::Io(err)
    }
}

impl From<pshell_wire::CodecError> for ControlError {
    fn from(_: pshell_wire::CodecError) -> Self {
        ControlError::SocketSelectFailure
    }
}
