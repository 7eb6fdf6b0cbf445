//! Transport (spec.md §4.4): four server kinds behind a small capability
//! set - bind, recv, send, close, supports_streaming - re-architected per
//! spec.md §9 away from the original's enum-branch-per-call-site style into
//! one enum per transport family with its own inherent methods.

pub mod datagram;
pub mod local;
pub mod stream;

pub use datagram::{DatagramPeer, DatagramTransport};
pub use local::LocalTransport;
pub use stream::StreamTransport;

/// The four server kinds a host program can start (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Udp,
    UnixDgram,
    Tcp,
    Local,
}

impl ServerKind {
    pub fn supports_streaming(self) -> bool {
        matches!(self, ServerKind::Tcp)
    }

    /// Native `quit`/`batch` availability differs by kind (spec.md §4.2):
    /// a datagram server has no interactive session to quit out of.
    pub fn supports_quit(self) -> bool {
        matches!(self, ServerKind::Tcp | ServerKind::Local)
    }
}
