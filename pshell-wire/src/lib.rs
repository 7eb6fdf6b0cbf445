//! Fixed-header + ASCII-payload datagram codec (spec.md §3, §4.1, §6.1).
//!
//! The header is 8 bytes: `msgType(1) respNeeded(1) dataNeeded(1) pad(1)
//! seqNum(4, big-endian)`. The payload is whatever bytes follow; datagram
//! length is authoritative, there is no length prefix.

mod error;
pub mod msg;

pub use error::CodecError;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Protocol version advertised by `QUERY_VERSION`.
pub const PSHELL_VERSION: u32 = 1;

/// A decoded, borrowed view over a received frame. Never allocates: the
/// payload is a slice into the caller's receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub msg_type: u8,
    pub resp_needed: bool,
    pub data_needed: bool,
    pub seq_num: u32,
    pub payload: &'a [u8],
}

impl<'a> FrameView<'a> {
    /// Decode a frame from `buf`. Rejects anything shorter than
    /// [`HEADER_SIZE`] rather than panicking.
    pub fn decode(buf: &'a [u8]) -> Result<FrameView<'a>, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut cursor = Cursor::new(&buf[..HEADER_SIZE]);
        let msg_type = cursor.read_u8()?;
        let resp_needed = cursor.read_u8()? != 0;
        let data_needed = cursor.read_u8()? != 0;
        let _pad = cursor.read_u8()?;
        let seq_num = cursor.read_u32::<BigEndian>()?;

        Ok(FrameView {
            msg_type,
            resp_needed,
            data_needed,
            seq_num,
            payload: &buf[HEADER_SIZE..],
        })
    }

    /// Payload interpreted as 7-bit ASCII. Non-ASCII bytes are not an error
    /// at the codec layer - validation of command payloads happens in the
    /// tokenizer, closer to where a diagnostic can name the offending
    /// command.
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(self.payload).unwrap_or("")
    }

    pub fn to_owned(&self) -> Frame {
        Frame {
            msg_type: self.msg_type,
            resp_needed: self.resp_needed,
            data_needed: self.data_needed,
            seq_num: self.seq_num,
            payload: self.payload.to_vec(),
        }
    }
}

/// An owned frame, for callers that need to hold on to a decoded message
/// past the lifetime of the receive buffer (e.g. the control client's
/// session table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub resp_needed: bool,
    pub data_needed: bool,
    pub seq_num: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn as_view(&self) -> FrameView<'_> {
        FrameView {
            msg_type: self.msg_type,
            resp_needed: self.resp_needed,
            data_needed: self.data_needed,
            seq_num: self.seq_num,
            payload: &self.payload,
        }
    }
}

/// Encode a frame into a freshly allocated buffer. Never allocates more
/// than `HEADER_SIZE + payload.len()` bytes.
pub fn encode(msg_type: u8, resp_needed: bool, data_needed: bool, seq_num: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    encode_into(&mut buf, msg_type, resp_needed, data_needed, seq_num, payload)
        .expect("Vec<u8> writes are infallible");
    buf
}

/// Encode a frame into caller-supplied storage, appending to whatever is
/// already there. Used by the server to write directly into its reply
/// buffer without an intermediate allocation.
pub fn encode_into<W: Write>(
    mut out: W,
    msg_type: u8,
    resp_needed: bool,
    data_needed: bool,
    seq_num: u32,
    payload: &[u8],
) -> Result<(), CodecError> {
    out.write_u8(msg_type)?;
    out.write_u8(resp_needed as u8)?;
    out.write_u8(data_needed as u8)?;
    out.write_u8(0)?;
    out.write_u32::<BigEndian>(seq_num)?;
    out.write_all(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let encoded = encode(msg::USER_COMMAND, true, false, 42, b"echo hello");
        let view = FrameView::decode(&encoded).unwrap();

        assert_eq!(view.msg_type, msg::USER_COMMAND);
        assert!(view.resp_needed);
        assert!(!view.data_needed);
        assert_eq!(view.seq_num, 42);
        assert_eq!(view.payload, b"echo hello");
    }

    #[test]
    fn roundtrip_empty_payload() {
        let encoded = encode(msg::COMMAND_COMPLETE, true, true, 7, b"");
        let view = FrameView::decode(&encoded).unwrap();

        assert_eq!(view.payload.len(), 0);
        assert_eq!(view.seq_num, 7);
    }

    #[test]
    fn rejects_short_frame() {
        let err = FrameView::decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CodecError::TooShort { .. }));
    }

    #[test]
    fn encode_decode_encode_is_byte_identical() {
        let first = encode(msg::CONTROL_COMMAND, false, true, 9001, b"trace global INFO");
        let view = FrameView::decode(&first).unwrap();
        let second = encode(view.msg_type, view.resp_needed, view.data_needed, view.seq_num, view.payload);

        assert_eq!(first, second);
    }
}
