//! Dispatch/Protocol State Machine (spec.md §4.4): classifies inbound
//! frames as meta-queries or user/control commands, invokes the registered
//! callback, and packages its output into a reply frame - growing or
//! flushing the payload buffer as needed (spec.md §4.5).

use crate::args::tokenize;
use crate::payload::{GrowthPolicy, PayloadBuffer};
use crate::registry::{Callback, FindResult, Registry, RegistryError};
use pshell_wire::{encode, msg, Frame, FrameView, PSHELL_VERSION};
use slog::{o, warn, Logger};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub const COMMANDS2_DELIMITER: char = '\n';

/// Static server identity strings reported by the meta queries.
pub struct Identity {
    pub name: String,
    pub title: String,
    pub banner: String,
    pub prompt: String,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Identity {
        let name = name.into();
        Identity {
            title: format!("{} PSHELL server", name),
            banner: format!("PSHELL Server: {}", name),
            prompt: format!("{}> ", name),
            name,
        }
    }
}

pub struct Server {
    pub identity: Identity,
    registry: Mutex<Registry>,
    dispatch_lock: Mutex<()>,
    payload_policy: GrowthPolicy,
    logger: Logger,
    next_seq: AtomicU32,
}

impl Server {
    pub fn new(identity: Identity, payload_policy: GrowthPolicy, logger: Logger) -> Server {
        let logger = logger.new(o!("server" => identity.name.clone()));
        Server {
            identity,
            registry: Mutex::new(Registry::new()),
            dispatch_lock: Mutex::new(()),
            payload_policy,
            logger,
            next_seq: AtomicU32::new(0),
        }
    }

    pub fn add_command(
        &self,
        name: &str,
        description: &str,
        usage: Option<&str>,
        min_args: usize,
        max_args: usize,
        show_usage: bool,
        callback: Callback,
    ) -> Result<(), RegistryError> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        let result = registry.add(name, description, usage, min_args, max_args, show_usage, callback);
        match &result {
            Err(err) => {
                warn!(self.logger, "command registration failed"; "name" => name, "error" => %err);
            }
            Ok(true) => {
                warn!(self.logger, "command name shadows a native, admitted for one-shot dispatch only"; "name" => name);
            }
            Ok(false) => {}
        }
        result.map(|_shadowed| ())
    }

    pub fn install_natives(&self, help: Callback, quit: Option<Callback>, batch: Option<Callback>) {
        self.registry.lock().expect("registry mutex poisoned").install_natives(help, quit, batch);
    }

    /// Invoke a command directly from the host's own thread (spec.md §4.4,
    /// §4.6). Serialized against inbound dispatch by `dispatch_lock`. Silent
    /// no-op on no match or bad arg count (spec.md §7).
    pub fn run_command(&self, line: &str) -> String {
        let _guard = self.dispatch_lock.lock().expect("dispatch mutex poisoned");
        self.invoke(line)
    }

    /// The lock-free body of `run_command`. Exposed for the `batch` native
    /// command, which runs one line per iteration from inside a callback
    /// that is itself already invoked under `dispatch_lock` - calling back
    /// into `run_command` there would deadlock on the non-reentrant mutex.
    pub fn invoke(&self, line: &str) -> String {
        let argv = tokenize(line, ' ');
        if argv.is_empty() {
            return String::new();
        }

        let registry = self.registry.lock().expect("registry mutex poisoned");
        let callback = match registry.find(argv[0]) {
            FindResult::Unique(cmd) => {
                let args = argv[1..].len();
                if args < cmd.min_args || args > cmd.max_args {
                    return String::new();
                }
                cmd.callback.clone()
            }
            _ => return String::new(),
        };
        drop(registry);

        let mut out = Vec::new();
        let args: Vec<String> = argv[1..].iter().map(|s| s.to_string()).collect();
        callback(&args, &mut out);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// `<name padded>  -  <description>` for every registered command
    /// (spec.md §4.2), used by the `help` native command.
    pub fn render_help(&self) -> String {
        self.registry.lock().expect("registry mutex poisoned").render_help()
    }

    /// Classify and dispatch one inbound frame. `emit_intermediate` is
    /// called with every frame that must be sent before the final reply
    /// (payload-size growth notices, flush-on-overflow chunks); the final
    /// reply, if any, is returned so the transport loop can send it.
    pub fn dispatch<F>(&self, request: &FrameView<'_>, mut emit_intermediate: F) -> Option<Frame>
    where
        F: FnMut(Frame),
    {
        if msg::is_meta_query(request.msg_type) {
            return self.dispatch_meta_query(request);
        }

        match request.msg_type {
            msg::USER_COMMAND => self.dispatch_command(request, false, &mut emit_intermediate),
            msg::CONTROL_COMMAND => self.dispatch_command(request, true, &mut emit_intermediate),
            _ => None,
        }
    }

    fn dispatch_meta_query(&self, request: &FrameView<'_>) -> Option<Frame> {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        let payload = match request.msg_type {
            msg::QUERY_VERSION => PSHELL_VERSION.to_string().into_bytes(),
            msg::QUERY_PAYLOAD_SIZE => crate::payload::DEFAULT_INITIAL_CAPACITY.to_string().into_bytes(),
            msg::QUERY_NAME => self.identity.name.clone().into_bytes(),
            msg::QUERY_TITLE => self.identity.title.clone().into_bytes(),
            msg::QUERY_BANNER => self.identity.banner.clone().into_bytes(),
            msg::QUERY_PROMPT => self.identity.prompt.clone().into_bytes(),
            msg::QUERY_COMMANDS1 => registry.render_help().into_bytes(),
            msg::QUERY_COMMANDS2 => registry.render_names(COMMANDS2_DELIMITER).into_bytes(),
            _ => Vec::new(),
        };

        if !request.resp_needed {
            return None;
        }

        Some(Frame {
            msg_type: request.msg_type,
            resp_needed: false,
            data_needed: request.data_needed,
            seq_num: request.seq_num,
            payload,
        })
    }

    /// Returns `None` when the inbound frame had `respNeeded = 0` (spec.md
    /// §4.4: "A reply is sent only if the inbound frame had respNeeded =
    /// 1") - the command still runs for its side effects (e.g. a multicast
    /// fire-and-forget control command), but no reply or intermediate
    /// payload-growth/flush frame is emitted back to the caller.
    fn dispatch_command<F>(&self, request: &FrameView<'_>, is_control: bool, emit_intermediate: &mut F) -> Option<Frame>
    where
        F: FnMut(Frame),
    {
        let _guard = self.dispatch_lock.lock().expect("dispatch mutex poisoned");
        let argv = tokenize(request.payload_str(), ' ');

        let mut buffer = PayloadBuffer::with_defaults(self.payload_policy);
        let allow_flush = !is_control;
        let resp_needed = request.resp_needed;
        let mut emit = |frame: Frame| {
            if resp_needed {
                emit_intermediate(frame);
            }
        };

        let (reply_type, error_line) = if argv.is_empty() {
            (self.not_found_reply(is_control), Some("PSHELL_ERROR: empty command".to_string()))
        } else {
            let registry = self.registry.lock().expect("registry mutex poisoned");
            match registry.find_one_shot(argv[0]) {
                FindResult::Help => {
                    let help = registry.render_help();
                    drop(registry);
                    (self.success_reply(is_control), Some(help))
                }
                FindResult::NotFound => (
                    self.not_found_reply(is_control),
                    Some(format!("PSHELL_ERROR: Command: '{}' not found", argv[0])),
                ),
                FindResult::Ambiguous(_) => (
                    self.not_found_reply(is_control),
                    Some(format!("PSHELL_ERROR: Ambiguous command abbreviation: '{}'", argv[0])),
                ),
                FindResult::Unique(cmd) => {
                    let args: Vec<&str> = argv[1..].to_vec();
                    let wants_help = matches!(args.first().copied(), Some("?") | Some("-h") | Some("-help") | Some("--help"));

                    if wants_help && cmd.show_usage {
                        let line = cmd.usage_line();
                        drop(registry);
                        (self.success_reply(is_control), Some(line))
                    } else if !wants_help && (args.len() < cmd.min_args || args.len() > cmd.max_args) {
                        let line = cmd.usage_line();
                        drop(registry);
                        (
                            self.invalid_arg_count_reply(is_control),
                            Some(format!("PSHELL_ERROR: Invalid arg count\n{}", line)),
                        )
                    } else {
                        let callback = cmd.callback.clone();
                        drop(registry);
                        let owned_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
                        let mut out = Vec::new();
                        callback(&owned_args, &mut out);

                        self.flush_output(&out, allow_flush, request, &mut emit, &mut buffer);
                        (self.success_reply(is_control), None)
                    }
                }
            }
        };

        if let Some(line) = error_line {
            self.flush_output(line.as_bytes(), allow_flush, request, &mut emit, &mut buffer);
        }

        if !resp_needed {
            return None;
        }

        let payload = if request.data_needed || !is_control { buffer.as_slice().to_vec() } else { Vec::new() };

        Some(Frame {
            msg_type: reply_type,
            resp_needed: false,
            data_needed: request.data_needed,
            seq_num: request.seq_num,
            payload,
        })
    }

    fn flush_output<F>(
        &self,
        out: &[u8],
        allow_flush: bool,
        request: &FrameView<'_>,
        emit_intermediate: &mut F,
        buffer: &mut PayloadBuffer,
    ) where
        F: FnMut(Frame),
    {
        if let Some(flushed) = buffer.push(out, allow_flush) {
            emit_intermediate(Frame {
                msg_type: msg::COMMAND_COMPLETE,
                resp_needed: false,
                data_needed: request.data_needed,
                seq_num: request.seq_num,
                payload: flushed,
            });
        }

        if let Some(new_size) = buffer.take_growth() {
            emit_intermediate(Frame {
                msg_type: msg::UPDATE_PAYLOAD_SIZE,
                resp_needed: false,
                data_needed: request.data_needed,
                seq_num: request.seq_num,
                payload: new_size.to_string().into_bytes(),
            });
        }
    }

    fn success_reply(&self, is_control: bool) -> u8 {
        if is_control {
            msg::COMMAND_SUCCESS
        } else {
            msg::COMMAND_COMPLETE
        }
    }

    fn not_found_reply(&self, is_control: bool) -> u8 {
        if is_control {
            msg::COMMAND_NOT_FOUND
        } else {
            msg::COMMAND_COMPLETE
        }
    }

    fn invalid_arg_count_reply(&self, is_control: bool) -> u8 {
        if is_control {
            msg::COMMAND_INVALID_ARG_COUNT
        } else {
            msg::COMMAND_COMPLETE
        }
    }

    /// Command names for TAB completion and `help`, in registration order.
    pub fn command_names(&self) -> Vec<String> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .list()
            .map(|cmd| cmd.name.clone())
            .collect()
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

/// Encode a reply `Frame` to bytes, honoring `respNeeded` (spec.md §4.4: "a
/// reply is sent only if the inbound frame had respNeeded = 1").
pub fn encode_reply(frame: &Frame) -> Vec<u8> {
    encode(frame.msg_type, frame.resp_needed, frame.data_needed, frame.seq_num, &frame.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::GrowthPolicy;
    use std::sync::Arc;

    fn server_with_echo() -> Server {
        let server = Server::new(Identity::new("test"), GrowthPolicy::Chunk(4096), pshell_support::logging::discard_logger());
        server
            .add_command(
                "echo",
                "echo arguments back",
                Some("<text>..."),
                1,
                8,
                true,
                Arc::new(|args, out| {
                    use std::io::Write;
                    write!(out, "{}", args.join(" ")).unwrap();
                }),
            )
            .unwrap();
        server
    }

    #[test]
    fn user_command_echoes_args() {
        let server = server_with_echo();
        let request = FrameView {
            msg_type: msg::USER_COMMAND,
            resp_needed: true,
            data_needed: true,
            seq_num: 42,
            payload: b"echo hello world",
        };

        let reply = server.dispatch(&request, |_| {}).unwrap();
        assert_eq!(reply.msg_type, msg::COMMAND_COMPLETE);
        assert_eq!(reply.seq_num, 42);
        assert_eq!(reply.payload, b"hello world");
    }

    #[test]
    fn control_command_not_found() {
        let server = server_with_echo();
        let request = FrameView {
            msg_type: msg::CONTROL_COMMAND,
            resp_needed: true,
            data_needed: true,
            seq_num: 7,
            payload: b"doesnotexist",
        };

        let reply = server.dispatch(&request, |_| {}).unwrap();
        assert_eq!(reply.msg_type, msg::COMMAND_NOT_FOUND);
    }

    #[test]
    fn no_reply_when_not_requested() {
        let server = server_with_echo();
        let request = FrameView {
            msg_type: msg::USER_COMMAND,
            resp_needed: false,
            data_needed: false,
            seq_num: 1,
            payload: b"echo hi",
        };
        assert!(server.dispatch(&request, |_| {}).is_none());
    }

    #[test]
    fn run_command_silent_no_op_on_miss() {
        let server = server_with_echo();
        assert_eq!(server.run_command("nope"), "");
    }

    #[test]
    fn large_reply_emits_update_payload_size_before_final_reply() {
        let server = Server::new(Identity::new("test"), GrowthPolicy::Chunk(4096), pshell_support::logging::discard_logger());
        server
            .add_command(
                "big",
                "write a large reply",
                None,
                0,
                0,
                false,
                Arc::new(|_args, out| {
                    use std::io::Write;
                    out.write_all(&[b'x'; 5000]).unwrap();
                }),
            )
            .unwrap();

        let request = FrameView { msg_type: msg::USER_COMMAND, resp_needed: true, data_needed: true, seq_num: 9, payload: b"big" };

        let mut intermediates = Vec::new();
        let reply = server.dispatch(&request, |frame| intermediates.push(frame)).unwrap();

        assert_eq!(intermediates.len(), 1);
        assert_eq!(intermediates[0].msg_type, msg::UPDATE_PAYLOAD_SIZE);
        assert_eq!(intermediates[0].payload, b"8192");

        assert_eq!(reply.msg_type, msg::COMMAND_COMPLETE);
        assert_eq!(reply.payload.len(), 5000);
    }

    #[test]
    fn fire_and_forget_large_reply_emits_no_frames_at_all() {
        let server = Server::new(Identity::new("test"), GrowthPolicy::Chunk(4096), pshell_support::logging::discard_logger());
        server
            .add_command(
                "big",
                "write a large reply",
                None,
                0,
                0,
                false,
                Arc::new(|_args, out| {
                    use std::io::Write;
                    out.write_all(&[b'x'; 5000]).unwrap();
                }),
            )
            .unwrap();

        let request = FrameView { msg_type: msg::CONTROL_COMMAND, resp_needed: false, data_needed: false, seq_num: 1, payload: b"big" };

        let mut intermediates = Vec::new();
        let reply = server.dispatch(&request, |frame| intermediates.push(frame));

        assert!(intermediates.is_empty());
        assert!(reply.is_none());
    }
}
