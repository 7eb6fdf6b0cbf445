//! Stream (TCP) transport (spec.md §4.4): single concurrent session - a
//! new `accept` is not serviced until the current one ends.

use std::io;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};

/// Telnet IAC sequences requesting the client suppress local echo and run
/// in character-at-a-time mode, sent once per new session.
const TELNET_INITIAL_NEGOTIATION: &[u8] = &[
    0xff, 0xfb, 0x01, // IAC WILL ECHO
    0xff, 0xfb, 0x03, // IAC WILL SUPPRESS-GO-AHEAD
    0xff, 0xfd, 0x03, // IAC DO SUPPRESS-GO-AHEAD
];

pub struct StreamTransport {
    listener: TcpListener,
}

impl StreamTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<StreamTransport> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(StreamTransport { listener })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept the next session. The caller must finish servicing the
    /// returned stream (it is dropped, closing the connection) before
    /// calling `accept` again - this is what enforces the single
    /// concurrent session invariant.
    pub fn accept(&self) -> io::Result<TcpStream> {
        let (stream, _addr) = self.listener.accept()?;
        stream.set_nonblocking(false)?;
        Ok(stream)
    }

    pub fn send_initial_negotiation(stream: &mut TcpStream) -> io::Result<()> {
        use std::io::Write;
        stream.write_all(TELNET_INITIAL_NEGOTIATION)
    }
}
