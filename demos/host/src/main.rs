//! Example host process: registers a couple of illustrative commands and a
//! few trace levels, then starts a PSHELL server on the transport kind
//! requested on the command line.

use clap::{App, Arg};
use pshell::{ServerKind, Shell, ShellOptions, TraceControl, TraceFilter};
use pshell_support::logging::{terminal_logger, LogLevel};
use slog::info;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn parse_kind(value: &str) -> ServerKind {
    match value {
        "udp" => ServerKind::Udp,
        "unix" => ServerKind::UnixDgram,
        "tcp" => ServerKind::Tcp,
        "local" => ServerKind::Local,
        other => panic!("unknown server kind '{}', expected udp|unix|tcp|local", other),
    }
}

fn main() {
    let matches = App::new("pshell-demo-host")
        .version("0.1.0")
        .about("Embeds a PSHELL server in a standalone process")
        .arg(
            Arg::with_name("KIND")
                .long("kind")
                .takes_value(true)
                .default_value("local")
                .help("Transport kind: udp, unix, tcp, local"),
        )
        .arg(
            Arg::with_name("PORT")
                .long("port")
                .takes_value(true)
                .default_value("6001")
                .help("Port to bind (udp/tcp kinds only)"),
        )
        .get_matches();

    let kind = parse_kind(matches.value_of("KIND").unwrap());
    let port: u16 = matches.value_of("PORT").unwrap().parse().expect("PORT must be a valid integer");

    let logger = terminal_logger(LogLevel::Info);

    let options = ShellOptions::new("demoHost", kind).port(port).with_config_file();
    let shell = Shell::new(options, logger.clone());

    register_demo_commands(&shell);
    let trace = register_demo_trace(&shell, logger.clone());

    info!(logger, "demo host ready"; "kind" => format!("{:?}", kind));
    let handle = shell.start().expect("failed to start shell server");

    // Fire a couple of illustrative trace checks so the demo shows output
    // immediately under the default trace level.
    if trace.is_filter_passed(file!(), line!(), "main", "INFO") {
        info!(logger, "trace filter passed at startup under the default level");
    }

    handle.join();
}

fn register_demo_commands(shell: &Arc<Shell>) {
    shell
        .server()
        .add_command(
            "hello",
            "Print a friendly greeting",
            Some("[<name>]"),
            0,
            1,
            true,
            Arc::new(|args, out| {
                let name = args.first().map(String::as_str).unwrap_or("world");
                let _ = write!(out, "Hello, {}!", name);
            }),
        )
        .expect("failed to register 'hello'");

    let counter = Arc::new(AtomicU64::new(0));
    shell
        .server()
        .add_command(
            "counter",
            "Increment and print a shared counter",
            None,
            0,
            0,
            false,
            Arc::new(move |_args, out| {
                let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = write!(out, "counter = {}", value);
            }),
        )
        .expect("failed to register 'counter'");
}

fn register_demo_trace(shell: &Arc<Shell>, logger: slog::Logger) -> Arc<TraceFilter> {
    let trace = TraceFilter::new(logger);
    trace.add_level("ERROR", 0, true, false).expect("failed to register ERROR level");
    trace.add_level("WARN", 1, true, true).expect("failed to register WARN level");
    trace.add_level("INFO", 2, true, true).expect("failed to register INFO level");
    trace.add_level("DEBUG", 3, false, true).expect("failed to register DEBUG level");
    trace.init(shell.server());

    let watched = Arc::new(AtomicU64::new(0));
    let reader = {
        let watched = watched.clone();
        Arc::new(move || watched.load(Ordering::SeqCst))
    };
    trace
        .watch("demoCounter", reader, 8, "%llu", TraceControl::Continuous)
        .expect("failed to register demoCounter watchpoint");

    trace
}
