//! Control session table (spec.md §3, §4.6): a fixed-capacity table of
//! connections to remote PSHELL servers, addressed by an opaque `Sid`.

use crate::error::ControlError;
use pshell_support::paths::socket_dir;
use rand::Rng;
use std::fs;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::time::Duration;

/// Sentinel `port` value selecting the Unix-datagram transport instead of
/// UDP (spec.md §4.6). Port 0 has no meaning as a real destination port for
/// `connectServer`, so it doubles as the sentinel - see DESIGN.md.
pub const UNIX_CONTROL: u16 = 0;

/// Opaque session handle. `INVALID_SID` is returned by a failed `connect`.
pub type Sid = i32;
pub const INVALID_SID: Sid = -1;

/// Hard cap on live sessions (spec.md §3).
pub const MAX_SESSIONS: usize = 100;

const CLIENT_BIND_RETRIES: u32 = 1000;

enum ClientTransport {
    Udp { socket: UdpSocket, dest: SocketAddr },
    Unix { socket: UnixDatagram, dest: PathBuf },
}

impl ClientTransport {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientTransport::Udp { socket, dest } => socket.send_to(buf, dest),
            ClientTransport::Unix { socket, dest } => socket.send_to(buf, dest),
        }
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientTransport::Udp { socket, .. } => socket.recv(buf),
            ClientTransport::Unix { socket, .. } => socket.recv(buf),
        }
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            ClientTransport::Udp { socket, .. } => socket.set_read_timeout(timeout),
            ClientTransport::Unix { socket, .. } => socket.set_read_timeout(timeout),
        }
    }
}

pub struct Session {
    pub name: String,
    transport: ClientTransport,
    pub default_timeout: Duration,
    seq_num: u32,
}

impl Session {
    pub(crate) fn send(&self, buf: &[u8]) -> Result<(), ControlError> {
        self.transport.send(buf).map_err(|_| ControlError::SocketSendFailure)?;
        Ok(())
    }

    pub(crate) fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, ControlError> {
        self.transport
            .set_timeout(if timeout.is_zero() { None } else { Some(timeout) })
            .map_err(ControlError::Io)?;
        match self.transport.recv(buf) {
            Ok(n) => Ok(n),
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(ControlError::SocketTimeout)
            }
            Err(_) => Err(ControlError::SocketSelectFailure),
        }
    }

    pub(crate) fn next_seq(&mut self) -> u32 {
        self.seq_num = self.seq_num.wrapping_add(1);
        self.seq_num
    }

    pub(crate) fn observe_seq(&mut self, seq: u32) {
        if seq > self.seq_num {
            self.seq_num = seq;
        }
    }
}

#[derive(Default)]
pub struct SessionTable {
    slots: Vec<Option<Session>>,
}

impl SessionTable {
    pub fn new() -> SessionTable {
        SessionTable { slots: Vec::new() }
    }

    /// `connectServer(name, remoteHost, port, defaultTimeoutMs) -> SID`
    /// (spec.md §4.6). `port == UNIX_CONTROL` binds a Unix-datagram client
    /// socket and interprets `remote_host` as a server name under the
    /// well-known socket directory; otherwise a UDP socket is bound and
    /// `remote_host` is resolved as a hostname/IP (`"localhost"` maps to
    /// `127.0.0.1`).
    pub fn connect(
        &mut self,
        name: &str,
        remote_host: &str,
        port: u16,
        default_timeout: Duration,
    ) -> Result<Sid, ControlError> {
        let slot = self.free_slot()?;

        let transport = if port == UNIX_CONTROL {
            bind_unix_client(remote_host)?
        } else {
            bind_udp_client(remote_host, port)?
        };

        let session = Session {
            name: name.to_string(),
            transport,
            default_timeout,
            seq_num: 0,
        };

        match slot {
            Some(idx) => {
                self.slots[idx] = Some(session);
                Ok(idx as Sid)
            }
            None => {
                self.slots.push(Some(session));
                Ok((self.slots.len() - 1) as Sid)
            }
        }
    }

    /// Releases the slot; a subsequent `connect` may reuse it (spec.md §8).
    pub fn disconnect(&mut self, sid: Sid) -> Result<(), ControlError> {
        let slot = self.slot_mut(sid)?;
        *slot = None;
        Ok(())
    }

    pub fn set_default_timeout(&mut self, sid: Sid, timeout: Duration) -> Result<(), ControlError> {
        self.get_mut(sid)?.default_timeout = timeout;
        Ok(())
    }

    pub fn get(&self, sid: Sid) -> Result<&Session, ControlError> {
        self.slot(sid)?.as_ref().ok_or(ControlError::InvalidSid)
    }

    pub fn get_mut(&mut self, sid: Sid) -> Result<&mut Session, ControlError> {
        self.slot_mut(sid)?.as_mut().ok_or(ControlError::InvalidSid)
    }

    fn slot(&self, sid: Sid) -> Result<&Option<Session>, ControlError> {
        if sid < 0 {
            return Err(ControlError::InvalidSid);
        }
        self.slots.get(sid as usize).ok_or(ControlError::InvalidSid)
    }

    fn slot_mut(&mut self, sid: Sid) -> Result<&mut Option<Session>, ControlError> {
        if sid < 0 {
            return Err(ControlError::InvalidSid);
        }
        self.slots.get_mut(sid as usize).ok_or(ControlError::InvalidSid)
    }

    fn free_slot(&self) -> Result<Option<usize>, ControlError> {
        if let Some(idx) = self.slots.iter().position(Option::is_none) {
            return Ok(Some(idx));
        }
        if self.slots.len() >= MAX_SESSIONS {
            return Err(ControlError::TableFull);
        }
        Ok(None)
    }
}

fn bind_udp_client(remote_host: &str, port: u16) -> Result<ClientTransport, ControlError> {
    let host = if remote_host == "localhost" { "127.0.0.1" } else { remote_host };
    let dest = format!("{}:{}", host, port)
        .to_socket_addrs()
        .map_err(ControlError::Io)?
        .next()
        .ok_or_else(|| ControlError::Io(io::Error::new(io::ErrorKind::InvalidInput, "no address resolved")))?;

    let socket = UdpSocket::bind("0.0.0.0:0").map_err(ControlError::Io)?;
    Ok(ClientTransport::Udp { socket, dest })
}

fn bind_unix_client(server_name: &str) -> Result<ClientTransport, ControlError> {
    let dir = socket_dir();
    fs::create_dir_all(dir).map_err(ControlError::Io)?;
    let dest = dir.join(server_name);

    let mut rng = rand::thread_rng();
    for _ in 0..CLIENT_BIND_RETRIES {
        let candidate = dir.join(format!("pshellControlClient{}", rng.gen_range(0, 1000)));
        match UnixDatagram::bind(&candidate) {
            Ok(socket) => return Ok(ClientTransport::Unix { socket, dest }),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
            Err(err) => return Err(ControlError::Io(err)),
        }
    }

    Err(ControlError::Io(io::Error::new(io::ErrorKind::AddrInUse, "no free client socket name")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_reuse_after_disconnect() {
        let mut table = SessionTable::new();
        let sid = table.connect("a", "127.0.0.1", 9999, Duration::from_millis(100)).unwrap();
        table.disconnect(sid).unwrap();
        let sid2 = table.connect("b", "127.0.0.1", 9999, Duration::from_millis(100)).unwrap();
        assert_eq!(sid, sid2);
    }

    #[test]
    fn invalid_sid_rejected() {
        let table = SessionTable::new();
        assert!(matches!(table.get(0), Err(ControlError::InvalidSid)));
        assert!(matches!(table.get(-1), Err(ControlError::InvalidSid)));
    }
}
