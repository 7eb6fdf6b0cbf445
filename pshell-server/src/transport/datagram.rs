//! Datagram-IP (UDP) and Datagram-Unix transports (spec.md §4.4).

use std::fs;
use std::io;
use std::net::{self, SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

/// Where a reply should be sent back to.
#[derive(Debug, Clone)]
pub enum DatagramPeer {
    Udp(SocketAddr),
    Unix(PathBuf),
}

pub enum DatagramTransport {
    Udp(UdpSocket),
    Unix { socket: UnixDatagram, path: PathBuf },
}

impl DatagramTransport {
    /// `anybcast` or a host ending in `.255` binds for broadcast
    /// (spec.md §4.4, §6.7).
    pub fn bind_udp(host: &str, port: u16) -> io::Result<DatagramTransport> {
        let bind_host = resolve_bind_host(host);
        let addr = format!("{}:{}", bind_host, port);
        let mut addrs = addr.to_socket_addrs()?;
        let addr = addrs.next().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;

        let socket = UdpSocket::bind(addr)?;
        if host == "anybcast" || host.ends_with(".255") {
            socket.set_broadcast(true)?;
        }
        Ok(DatagramTransport::Udp(socket))
    }

    /// Binds under the well-known socket directory, unlinking a stale path
    /// from a previous run first (spec.md §4.4, §6.5).
    pub fn bind_unix(socket_dir: &Path, server_name: &str) -> io::Result<DatagramTransport> {
        fs::create_dir_all(socket_dir)?;
        let path = socket_dir.join(server_name);
        let _ = fs::remove_file(&path);

        // No mio Evented support for Unix datagrams in this stack (spec.md
        // §9: avoid busy-wait polling) - left blocking so `recv_from` parks
        // the thread instead of spinning.
        let socket = UnixDatagram::bind(&path)?;
        Ok(DatagramTransport::Unix { socket, path })
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, DatagramPeer)> {
        match self {
            DatagramTransport::Udp(socket) => {
                let (n, addr) = socket.recv_from(buf)?;
                Ok((n, DatagramPeer::Udp(addr)))
            }
            DatagramTransport::Unix { socket, .. } => {
                let (n, addr) = socket.recv_from(buf)?;
                let path = addr.as_pathname().map(Path::to_path_buf).unwrap_or_default();
                Ok((n, DatagramPeer::Unix(path)))
            }
        }
    }

    pub fn send_to(&self, buf: &[u8], peer: &DatagramPeer) -> io::Result<usize> {
        match (self, peer) {
            (DatagramTransport::Udp(socket), DatagramPeer::Udp(addr)) => socket.send_to(buf, addr),
            (DatagramTransport::Unix { socket, .. }, DatagramPeer::Unix(path)) => socket.send_to(buf, path),
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "peer/transport kind mismatch")),
        }
    }

    /// Unlink the filesystem artifact on clean shutdown (spec.md §5, §4.4).
    pub fn cleanup(&self) -> io::Result<()> {
        if let DatagramTransport::Unix { path, .. } = self {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

fn resolve_bind_host(host: &str) -> String {
    match host {
        "anyhost" | "anybcast" => "0.0.0.0".to_string(),
        "myhost" => net::TcpListener::bind("0.0.0.0:0")
            .ok()
            .and_then(|_| hostname_fallback())
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        "localhost" => "127.0.0.1".to_string(),
        other => other.to_string(),
    }
}

fn hostname_fallback() -> Option<String> {
    // Resolving the literal local hostname portably without an extra crate
    // is out of reach from std alone; bind broadly instead. Host programs
    // that need the resolved name can do so themselves and pass a literal
    // IP/host.
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_roundtrip_on_loopback() {
        let server = DatagramTransport::bind_udp("127.0.0.1", 0).unwrap();
        let server_addr = match &server {
            DatagramTransport::Udp(socket) => socket.local_addr().unwrap(),
            _ => unreachable!(),
        };

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"ping", server_addr).unwrap();

        let mut buf = [0u8; 16];
        std::thread::sleep(std::time::Duration::from_millis(20));
        let (n, peer) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        server.send_to(b"pong", &peer).unwrap();
        let mut reply = [0u8; 16];
        let (n, _) = client.recv_from(&mut reply).unwrap();
        assert_eq!(&reply[..n], b"pong");
    }

    #[test]
    fn unix_datagram_roundtrip() {
        let dir = std::env::temp_dir().join(format!("pshell-test-{}", std::process::id()));
        let server = DatagramTransport::bind_unix(&dir, "srv-test").unwrap();

        let client_path = dir.join("client-test");
        let client = UnixDatagram::bind(&client_path).unwrap();
        client.send_to(b"hello", dir.join("srv-test")).unwrap();

        let mut buf = [0u8; 16];
        std::thread::sleep(std::time::Duration::from_millis(20));
        let (n, peer) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        server.send_to(b"world", &peer).unwrap();
        let mut reply = [0u8; 16];
        let (n, _) = client.recv_from(&mut reply).unwrap();
        assert_eq!(&reply[..n], b"world");

        server.cleanup().unwrap();
        let _ = fs::remove_file(&client_path);
        let _ = fs::remove_dir(&dir);
    }
}
