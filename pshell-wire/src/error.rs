use std::fmt;
use std::io;

/// Errors the codec can report. Malformed input is always a value here,
/// never a panic - frames arrive from the network.
#[derive(Debug)]
pub enum CodecError {
    TooShort { expected: usize, actual: usize },
    Io(io::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::TooShort { expected, actual } => write!(
                f,
                "frame shorter than header: expected at least {} bytes, got {}",
                expected, actual
            ),
            CodecError::Io(err) => write!(f, "codec io error: {}", err),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<io::Error> for CodecError {
    #[inline]
    fn from(err: io::Error) -> Self {
        CodecError::Io(err)
    }
}
