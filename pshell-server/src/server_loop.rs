//! Live server loops (spec.md §4.4, §5): a datagram server blocks on
//! `recv_from` and dispatches each wire frame; a stream/local server drives
//! the interactive [`LineEditor`] over raw keystrokes, with idle timeout on
//! the TCP path implemented via a per-connection `mio::Poll` the way
//! `server/lib/neutronium`'s `Endpoint` times out a handshake or an idle
//! channel - a poll with no ready events within the deadline is the timeout,
//! never a sleep-and-recheck loop.

use crate::dispatch::{encode_reply, Server};
use crate::terminal::{Key, KeyDecoder, LineEditor, Outcome};
use crate::transport::{DatagramTransport, StreamTransport};
use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Poll, PollOpt, Ready, Token};
use pshell_wire::FrameView;
use slog::{info, warn};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const SESSION_TOKEN: Token = Token(0);

/// Run the datagram (UDP or Unix) protocol loop until `should_stop` returns
/// true. Blocks on `recv_from`; each inbound frame is dispatched and any
/// reply frame(s) sent back to the originating peer.
pub fn run_datagram_loop(server: &Server, transport: &DatagramTransport, mut should_stop: impl FnMut() -> bool) {
    let mut buf = vec![0u8; 64 * 1024];
    while !should_stop() {
        let (n, peer) = match transport.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(server.logger(), "recv failed"; "error" => %err);
                continue;
            }
        };

        let frame = match FrameView::decode(&buf[..n]) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(server.logger(), "malformed frame dropped"; "error" => %err);
                continue;
            }
        };

        let mut pending = Vec::new();
        let reply = server.dispatch(&frame, |intermediate| pending.push(intermediate));
        for out in pending.into_iter().chain(reply) {
            let bytes = encode_reply(&out);
            if let Err(err) = transport.send_to(&bytes, &peer) {
                warn!(server.logger(), "send failed"; "error" => %err);
            }
        }
    }
}

/// Accept and service stream sessions one at a time (spec.md §4.4: single
/// concurrent TCP session by design). Each session runs the interactive
/// line editor until `quit`, EOF, or `idle_timeout` elapses with no input.
pub fn run_stream_loop(
    server: &Server,
    transport: &StreamTransport,
    idle_timeout: Duration,
    mut should_stop: impl FnMut() -> bool,
) -> io::Result<()> {
    loop {
        if should_stop() {
            return Ok(());
        }
        let mut stream = match transport.accept() {
            Ok(stream) => stream,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err),
        };

        StreamTransport::send_initial_negotiation(&mut stream)?;
        if let Err(err) = run_session(server, stream, idle_timeout) {
            warn!(server.logger(), "session ended with error"; "error" => %err);
        }
    }
}

fn run_session(server: &Server, stream: TcpStream, idle_timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    let mio_stream = MioTcpStream::from_stream(stream.try_clone()?)?;

    let poll = Poll::new()?;
    poll.register(&mio_stream, SESSION_TOKEN, Ready::readable(), PollOpt::edge())?;
    let mut events = Events::with_capacity(256);

    let mut stream = stream;
    let mut decoder = KeyDecoder::default();
    let mut editor = LineEditor::new();
    let names = server.command_names();

    write_prompt(&mut stream, &server.identity.prompt)?;

    loop {
        events.clear();
        let got_events = poll.poll(&mut events, Some(idle_timeout))?;
        if got_events == 0 {
            let _ = writeln!(stream, "\r\nIdle session timeout, closing connection");
            info!(server.logger(), "session idle timeout");
            return Ok(());
        }

        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    if let Some(key) = decoder.feed(byte[0]) {
                        if !handle_key(server, &mut stream, &mut editor, &names, key)? {
                            return Ok(());
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
    }
}

/// Returns `false` when the session should close (`quit` or `Interrupt`).
fn handle_key(
    server: &Server,
    stream: &mut TcpStream,
    editor: &mut LineEditor,
    names: &[String],
    key: Key,
) -> io::Result<bool> {
    if matches!(key, Key::Tab) {
        match editor.complete(names) {
            Outcome::Complete(_) => {
                write!(stream, "\r\x1b[K{}{}", server.identity.prompt, editor.line())?;
            }
            Outcome::CompleteList(list) => {
                write!(stream, "\r\n{}\r\n", crate::terminal::format_grid(&list, 80))?;
                write_prompt(stream, &server.identity.prompt)?;
                write!(stream, "{}", editor.line())?;
            }
            _ => {}
        }
        stream.flush()?;
        return Ok(true);
    }

    match editor.apply(key) {
        Outcome::Idle => {}
        Outcome::Redraw => {
            write!(stream, "\r\x1b[K{}{}", server.identity.prompt, editor.line())?;
        }
        Outcome::Bell => stream.write_all(&crate::terminal::bell())?,
        Outcome::Commit(line) => {
            write!(stream, "\r\n")?;
            if line.trim() == "quit" {
                stream.flush()?;
                return Ok(false);
            }
            let output = server.run_command(&line);
            if !output.is_empty() {
                write!(stream, "{}\r\n", output.replace('\n', "\r\n"))?;
            }
            write_prompt(stream, &server.identity.prompt)?;
        }
        Outcome::Complete(_) | Outcome::CompleteList(_) => unreachable!("handled via Key::Tab above"),
    }
    stream.flush()?;
    Ok(true)
}

fn write_prompt(stream: &mut TcpStream, prompt: &str) -> io::Result<()> {
    write!(stream, "{}", prompt)?;
    stream.flush()
}

/// Drive the same line editor over the host process's own stdin/stdout
/// (spec.md §4.4 Local-loopback kind). No idle timeout - there is no remote
/// peer to time out, only the process's own controlling terminal.
pub fn run_local_loop(server: &Server, transport: &crate::transport::LocalTransport) -> io::Result<()> {
    let mut decoder = KeyDecoder::default();
    let mut editor = LineEditor::new();
    let names = server.command_names();
    let stdin = io::stdin();
    let mut lock = stdin.lock();

    transport.write_prompt(&server.identity.prompt)?;

    let mut byte = [0u8; 1];
    loop {
        if lock.read(&mut byte)? == 0 {
            return Ok(());
        }
        let key = match decoder.feed(byte[0]) {
            Some(key) => key,
            None => continue,
        };

        if matches!(key, Key::Tab) {
            match editor.complete(&names) {
                Outcome::Complete(_) => print!("\r{}", editor.line()),
                Outcome::CompleteList(list) => {
                    println!();
                    print!("{}", crate::terminal::format_grid(&list, 80));
                    transport.write_prompt(&server.identity.prompt)?;
                    print!("{}", editor.line());
                }
                _ => {}
            }
            io::Write::flush(&mut io::stdout())?;
            continue;
        }

        match editor.apply(key) {
            Outcome::Idle => {}
            Outcome::Redraw => {
                print!("\r\x1b[K{}{}", server.identity.prompt, editor.line());
                io::Write::flush(&mut io::stdout())?;
            }
            Outcome::Bell => {
                io::stdout().write_all(&crate::terminal::bell())?;
            }
            Outcome::Commit(line) => {
                println!();
                if line.trim() == "quit" {
                    return Ok(());
                }
                let output = server.run_command(&line);
                if !output.is_empty() {
                    transport.write_line(&output)?;
                }
                transport.write_prompt(&server.identity.prompt)?;
            }
            Outcome::Complete(_) | Outcome::CompleteList(_) => unreachable!("handled via Key::Tab above"),
        }
    }
}

