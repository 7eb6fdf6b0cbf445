//! The built-in `batch` command (spec.md §6.3): replays a file of commands
//! through the server's own dispatcher, optionally repeating on an
//! interval and clearing the screen between iterations.

use crate::config::non_comment_lines;
use crate::dispatch::Server;
use pshell_support::paths::find_file;
use std::fs;
use std::io::Write;
use std::thread;
use std::time::Duration;

const DEFAULT_BATCH_DIR: &str = "/etc/pshell/batch";

/// Used between iterations when `rate=` was not given - without it a
/// `repeat=forever` batch with no rate would spin the dispatch loop at
/// 100% CPU while holding `dispatch_lock` for the life of the process.
const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(1);

/// `repeat=<n>` / `repeat=forever`, `clear` (spec.md §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Times(u32),
    Forever,
}

pub struct BatchArgs {
    pub filename: String,
    pub rate: Option<Duration>,
    pub repeat: Repeat,
    pub clear: bool,
}

/// Parse `<filename> [rate=<sec>] [repeat=<n>|forever] [clear]`.
pub fn parse_batch_args(args: &[String]) -> Option<BatchArgs> {
    let filename = args.first()?.clone();
    let mut rate = None;
    let mut repeat = Repeat::Once;
    let mut clear = false;

    for arg in &args[1..] {
        if arg == "clear" {
            clear = true;
        } else if let Some(value) = arg.strip_prefix("rate=") {
            rate = value.parse::<u64>().ok().map(Duration::from_secs);
        } else if let Some(value) = arg.strip_prefix("repeat=") {
            repeat = if value == "forever" {
                Repeat::Forever
            } else {
                Repeat::Times(value.parse().ok()?)
            };
        }
    }

    Some(BatchArgs { filename, rate, repeat, clear })
}

/// Run the parsed `batch` invocation against `server`, writing nothing of
/// its own - every line's own command output already lands in `server`'s
/// reply buffer via `invoke`.
///
/// Uses `Server::invoke` rather than `Server::run_command`: this function is
/// itself only ever reached from inside the `batch` native command's own
/// callback, which `run_command`/`dispatch` already call under
/// `dispatch_lock` - re-entering `run_command` here would deadlock on that
/// non-reentrant mutex.
pub fn run_batch(server: &Server, batch: &BatchArgs, out: &mut dyn Write) {
    let path = match find_file("PSHELL_BATCH_DIR", DEFAULT_BATCH_DIR, &batch.filename) {
        Some(path) => path,
        None => {
            let _ = write!(out, "PSHELL_ERROR: batch file '{}' not found", batch.filename);
            return;
        }
    };

    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            let _ = write!(out, "PSHELL_ERROR: could not read '{}': {}", batch.filename, err);
            return;
        }
    };
    let lines = non_comment_lines(&contents);

    let mut iterations = 0u32;
    loop {
        if batch.clear {
            let _ = write!(out, "\x1b[2J\x1b[H");
        }

        for line in &lines {
            let result = server.invoke(line);
            if !result.is_empty() {
                let _ = writeln!(out, "{}", result);
            }
        }

        iterations += 1;
        let keep_going = match batch.repeat {
            Repeat::Once => false,
            Repeat::Times(n) => iterations < n,
            Repeat::Forever => true,
        };
        if !keep_going {
            break;
        }

        thread::sleep(batch.rate.unwrap_or(DEFAULT_REPEAT_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_repeat_clear() {
        let args: Vec<String> = vec!["cmds.batch".into(), "rate=2".into(), "repeat=3".into(), "clear".into()];
        let parsed = parse_batch_args(&args).unwrap();
        assert_eq!(parsed.filename, "cmds.batch");
        assert_eq!(parsed.rate, Some(Duration::from_secs(2)));
        assert_eq!(parsed.repeat, Repeat::Times(3));
        assert!(parsed.clear);
    }

    #[test]
    fn defaults_to_run_once_no_clear() {
        let args: Vec<String> = vec!["cmds.batch".into()];
        let parsed = parse_batch_args(&args).unwrap();
        assert_eq!(parsed.repeat, Repeat::Once);
        assert!(!parsed.clear);
        assert!(parsed.rate.is_none());
    }

    #[test]
    fn repeat_forever_parses() {
        let args: Vec<String> = vec!["cmds.batch".into(), "repeat=forever".into()];
        let parsed = parse_batch_args(&args).unwrap();
        assert_eq!(parsed.repeat, Repeat::Forever);
    }
}
