//! Control client (spec.md §4.6): connect/disconnect, send-and-wait with
//! stale-reply discarding, and multicast fan-out.

use crate::error::{ControlError, ResultCode};
use crate::multicast::MulticastTable;
use crate::session::{Sid, SessionTable, INVALID_SID};
use pshell_support::time::Deadline;
use pshell_wire::{encode, msg, FrameView};
use slog::{warn, Logger};
use std::sync::Mutex;
use std::time::Duration;

/// Receive scratch buffer size; oversized replies are a server bug (the
/// payload-size negotiation protocol keeps replies within the last
/// negotiated capacity, spec.md §4.5).
const RECV_BUFFER: usize = 64 * 1024;

#[derive(Debug)]
pub struct CommandReply {
    pub code: ResultCode,
    pub payload: Vec<u8>,
}

pub struct ControlClient {
    sessions: Mutex<SessionTable>,
    multicast: Mutex<MulticastTable>,
    logger: Logger,
}

impl ControlClient {
    pub fn new(logger: Logger) -> ControlClient {
        ControlClient {
            sessions: Mutex::new(SessionTable::new()),
            multicast: Mutex::new(MulticastTable::new()),
            logger,
        }
    }

    pub fn connect_server(
        &self,
        name: &str,
        remote_host: &str,
        port: u16,
        default_timeout: Duration,
    ) -> Sid {
        let mut sessions = self.sessions.lock().expect("session table mutex poisoned");
        match sessions.connect(name, remote_host, port, default_timeout) {
            Ok(sid) => sid,
            Err(err) => {
                warn!(self.logger, "connectServer failed"; "name" => name, "error" => %err);
                INVALID_SID
            }
        }
    }

    pub fn disconnect_server(&self, sid: Sid) {
        let mut sessions = self.sessions.lock().expect("session table mutex poisoned");
        let _ = sessions.disconnect(sid);
    }

    pub fn set_default_timeout(&self, sid: Sid, timeout: Duration) -> Result<(), ControlError> {
        self.sessions.lock().expect("session table mutex poisoned").set_default_timeout(sid, timeout)
    }

    /// `sendCommand` (spec.md §4.6): the reply payload is returned to the
    /// caller as an owned `Vec`. See [`ControlClient::send_command_into_buffer`]
    /// for the `sendCommand3`/`sendCommand4` fixed-buffer variant.
    pub fn send_command(
        &self,
        sid: Sid,
        timeout_override: Option<Duration>,
        command: &str,
    ) -> Result<CommandReply, ControlError> {
        self.send_command_with_data(sid, timeout_override, command, true)
    }

    /// `sendCommand3`/`sendCommand4` (spec.md §4.6): like `send_command`,
    /// but copies the reply payload into the caller's fixed-size
    /// `results_buffer`, truncating and NUL-terminating when the reply is
    /// larger than the buffer, and logging a warning when that happens.
    pub fn send_command_into_buffer(
        &self,
        sid: Sid,
        timeout_override: Option<Duration>,
        command: &str,
        results_buffer: &mut [u8],
    ) -> Result<ResultCode, ControlError> {
        let reply = self.send_command_with_data(sid, timeout_override, command, true)?;
        self.copy_into_buffer(command, &reply.payload, results_buffer);
        Ok(reply.code)
    }

    /// Copies `payload` into `results_buffer`, reserving the final byte for
    /// a NUL terminator. A no-op on a zero-length buffer (nothing to
    /// terminate).
    fn copy_into_buffer(&self, command: &str, payload: &[u8], results_buffer: &mut [u8]) {
        if results_buffer.is_empty() {
            return;
        }
        let capacity = results_buffer.len() - 1;
        let copy_len = payload.len().min(capacity);
        if payload.len() > capacity {
            warn!(self.logger, "sendCommand reply truncated to fit caller buffer";
                "command" => command, "reply_len" => payload.len(), "buffer_len" => results_buffer.len());
        }
        results_buffer[..copy_len].copy_from_slice(&payload[..copy_len]);
        results_buffer[copy_len] = 0;
    }

    fn send_command_with_data(
        &self,
        sid: Sid,
        timeout_override: Option<Duration>,
        command: &str,
        data_needed: bool,
    ) -> Result<CommandReply, ControlError> {
        let mut sessions = self.sessions.lock().expect("session table mutex poisoned");
        let session = sessions.get_mut(sid)?;

        let timeout = timeout_override.unwrap_or(session.default_timeout);
        let seq = session.next_seq();
        let resp_needed = !timeout.is_zero();

        let frame = encode(msg::CONTROL_COMMAND, resp_needed, data_needed, seq, command.as_bytes());
        session.send(&frame)?;

        if !resp_needed {
            return Ok(CommandReply { code: ResultCode::CommandSuccess, payload: Vec::new() });
        }

        let deadline = Deadline::after(timeout);
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            let remaining = deadline.remaining().unwrap_or(Duration::from_secs(0));
            if remaining.is_zero() {
                return Err(ControlError::SocketTimeout);
            }

            let n = session.recv(&mut buf, remaining)?;
            let view = FrameView::decode(&buf[..n])?;

            // Stale reply from an earlier, timed-out call - discard and
            // keep waiting on the same deadline (spec.md §4.6 step 5,
            // §9 Open Question: treated as best-effort, no restart of the
            // wall-clock budget).
            if view.seq_num < seq {
                continue;
            }

            session.observe_seq(view.seq_num);
            return Ok(CommandReply {
                code: ResultCode::from_wire(view.msg_type),
                payload: view.payload.to_vec(),
            });
        }
    }

    /// `extractCommands(sid, resultsBuffer)` (spec.md §4.6): query the
    /// connected server's command name list for client-side completion.
    pub fn extract_commands(&self, sid: Sid, timeout: Option<Duration>) -> Result<Vec<String>, ControlError> {
        let mut sessions = self.sessions.lock().expect("session table mutex poisoned");
        let session = sessions.get_mut(sid)?;

        let effective_timeout = timeout.unwrap_or(session.default_timeout);
        let seq = session.next_seq();
        let frame = encode(msg::QUERY_COMMANDS2, true, true, seq, &[]);
        session.send(&frame)?;

        let deadline = Deadline::after(effective_timeout);
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            let remaining = deadline.remaining().unwrap_or(Duration::from_secs(0));
            if remaining.is_zero() {
                return Err(ControlError::SocketTimeout);
            }
            let n = session.recv(&mut buf, remaining)?;
            let view = FrameView::decode(&buf[..n])?;
            if view.seq_num < seq {
                continue;
            }
            session.observe_seq(view.seq_num);
            return Ok(view.payload_str().split('\n').filter(|s| !s.is_empty()).map(str::to_string).collect());
        }
    }

    pub fn add_multicast(&self, sid: Sid, keyword: &str) {
        self.multicast.lock().expect("multicast table mutex poisoned").add(sid, keyword);
    }

    /// Best-effort fan-out; individual send failures are logged, never
    /// propagated (spec.md §4.6: "no result aggregation").
    pub fn send_multicast(&self, command: &str) {
        let sids = self.multicast.lock().expect("multicast table mutex poisoned").matching_sids(command);
        let mut sessions = self.sessions.lock().expect("session table mutex poisoned");

        for sid in sids {
            let session = match sessions.get_mut(sid) {
                Ok(session) => session,
                Err(_) => continue,
            };
            let seq = session.next_seq();
            let frame = encode(msg::CONTROL_COMMAND, false, false, seq, command.as_bytes());
            if let Err(err) = session.send(&frame) {
                warn!(self.logger, "multicast send failed"; "sid" => sid, "error" => %err);
            }
        }
    }

    pub fn get_response_string(code: ResultCode) -> &'static str {
        code.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::thread;

    #[test]
    fn send_command_roundtrip_over_udp() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let client = ControlClient::new(pshell_support::logging::discard_logger());
        let sid = client.connect_server("test", "127.0.0.1", peer_addr.port(), Duration::from_millis(500));
        assert_ne!(sid, INVALID_SID);

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 256];
            let (n, from) = peer.recv_from(&mut buf).unwrap();
            let view = FrameView::decode(&buf[..n]).unwrap();
            let reply = encode(msg::COMMAND_SUCCESS, false, true, view.seq_num, b"ok");
            peer.send_to(&reply, from).unwrap();
        });

        let reply = client.send_command(sid, None, "echo hi").unwrap();
        assert_eq!(reply.code, ResultCode::CommandSuccess);
        assert_eq!(reply.payload, b"ok");
        responder.join().unwrap();
    }

    #[test]
    fn send_command_times_out_with_no_responder() {
        let client = ControlClient::new(pshell_support::logging::discard_logger());
        let sid = client.connect_server("test", "127.0.0.1", 1, Duration::from_millis(50));
        let err = client.send_command(sid, None, "echo hi").unwrap_err();
        assert!(matches!(err, ControlError::SocketTimeout));
    }

    #[test]
    fn fire_and_forget_when_timeout_zero() {
        let client = ControlClient::new(pshell_support::logging::discard_logger());
        let sid = client.connect_server("test", "127.0.0.1", 1, Duration::from_secs(0));
        let reply = client.send_command(sid, None, "echo hi").unwrap();
        assert_eq!(reply.code, ResultCode::CommandSuccess);
        assert!(reply.payload.is_empty());
    }

    #[test]
    fn multicast_reaches_every_member_exactly_once() {
        let peer_a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr_a = peer_a.local_addr().unwrap();
        let addr_b = peer_b.local_addr().unwrap();
        peer_a.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        peer_b.set_read_timeout(Some(Duration::from_millis(200))).unwrap();

        let client = ControlClient::new(pshell_support::logging::discard_logger());
        let sid_a = client.connect_server("a", "127.0.0.1", addr_a.port(), Duration::from_millis(500));
        let sid_b = client.connect_server("b", "127.0.0.1", addr_b.port(), Duration::from_millis(500));
        client.add_multicast(sid_a, "foo");
        client.add_multicast(sid_b, "foo");

        client.send_multicast("foo bar");

        for peer in [&peer_a, &peer_b] {
            let mut buf = [0u8; 256];
            let (n, _) = peer.recv_from(&mut buf).unwrap();
            let view = FrameView::decode(&buf[..n]).unwrap();
            assert_eq!(view.msg_type, msg::CONTROL_COMMAND);
            assert!(!view.resp_needed);
            assert!(!view.data_needed);
            assert_eq!(view.payload_str(), "foo bar");
        }
    }

    #[test]
    fn send_command_into_buffer_copies_short_reply_with_nul_terminator() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let client = ControlClient::new(pshell_support::logging::discard_logger());
        let sid = client.connect_server("test", "127.0.0.1", peer_addr.port(), Duration::from_millis(500));

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 256];
            let (n, from) = peer.recv_from(&mut buf).unwrap();
            let view = FrameView::decode(&buf[..n]).unwrap();
            let reply = encode(msg::COMMAND_SUCCESS, false, true, view.seq_num, b"ok");
            peer.send_to(&reply, from).unwrap();
        });

        let mut results_buffer = [0xAAu8; 8];
        let code = client.send_command_into_buffer(sid, None, "echo hi", &mut results_buffer).unwrap();
        responder.join().unwrap();

        assert_eq!(code, ResultCode::CommandSuccess);
        assert_eq!(&results_buffer[..2], b"ok");
        assert_eq!(results_buffer[2], 0);
    }

    #[test]
    fn send_command_into_buffer_truncates_oversized_reply() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let client = ControlClient::new(pshell_support::logging::discard_logger());
        let sid = client.connect_server("test", "127.0.0.1", peer_addr.port(), Duration::from_millis(500));

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 256];
            let (n, from) = peer.recv_from(&mut buf).unwrap();
            let view = FrameView::decode(&buf[..n]).unwrap();
            let reply = encode(msg::COMMAND_SUCCESS, false, true, view.seq_num, &[b'x'; 20]);
            peer.send_to(&reply, from).unwrap();
        });

        let mut results_buffer = [0u8; 8];
        client.send_command_into_buffer(sid, None, "echo hi", &mut results_buffer).unwrap();
        responder.join().unwrap();

        assert_eq!(&results_buffer[..7], &[b'x'; 7][..]);
        assert_eq!(results_buffer[7], 0);
    }
}
