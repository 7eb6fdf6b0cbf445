//! Trace filter engine (spec.md §4.7): the `isFilterPassed` hot path, the
//! `trace` shell command grammar, and the state the two share - wrapped in
//! a single mutex the way the registry, session table, and multicast table
//! are process-wide singletons guarded by one writer lock each (spec.md §5).

use crate::error::TraceError;
use crate::filters::{Axis, FileFilter, FunctionFilter, LineRange, ThreadFilter, ThreadRegistry, MAX_FILE_FILTERS, MAX_FUNCTION_FILTERS, MAX_THREAD_FILTERS};
use crate::levels::LevelTable;
use crate::watch::{ConditionCallback, ConditionFn, Control, ValueReader, Watchpoint};
use pshell_server::Server;
use slog::{info, warn, Logger};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

struct EngineState {
    levels: LevelTable,
    threads: ThreadRegistry,
    files: Axis<String, FileFilter>,
    functions: Axis<String, FunctionFilter>,
    thread_axis: Axis<ThreadId, ThreadFilter>,
    watchpoint: Option<Watchpoint>,
    callback: Option<ConditionCallback>,

    initialized: bool,
    trace_enabled: bool,
    filter_enabled: bool,
    local_filter_enabled: bool,
    global_filter_enabled: bool,
    file_filter_enabled: bool,
    function_filter_enabled: bool,
    thread_filter_enabled: bool,
    hierarchical_level: usize,
    global_level: u32,
}

impl EngineState {
    fn new() -> EngineState {
        EngineState {
            levels: LevelTable::new(),
            threads: ThreadRegistry::default(),
            files: Axis::with_capacity(MAX_FILE_FILTERS),
            functions: Axis::with_capacity(MAX_FUNCTION_FILTERS),
            thread_axis: Axis::with_capacity(MAX_THREAD_FILTERS),
            watchpoint: None,
            callback: None,
            initialized: false,
            trace_enabled: true,
            filter_enabled: true,
            local_filter_enabled: false,
            global_filter_enabled: true,
            file_filter_enabled: false,
            function_filter_enabled: false,
            thread_filter_enabled: false,
            hierarchical_level: 0,
            global_level: 0,
        }
    }
}

pub struct TraceFilter {
    state: Mutex<EngineState>,
    logger: Logger,
}

impl TraceFilter {
    pub fn new(logger: Logger) -> Arc<TraceFilter> {
        Arc::new(TraceFilter { state: Mutex::new(EngineState::new()), logger })
    }

    /// `addLevel` (spec.md §4.7); must be called before `init`.
    pub fn add_level(&self, name: &str, index: usize, is_default: bool, is_maskable: bool) -> Result<(), TraceError> {
        let mut state = self.state.lock().expect("trace state mutex poisoned");
        state.levels.add_level(name, index, is_default, is_maskable).map_err(|err| {
            warn!(self.logger, "addLevel failed"; "name" => name, "error" => %err);
            TraceError::from(err)
        })
    }

    pub fn register_thread(&self, name: &str) {
        self.state.lock().expect("trace state mutex poisoned").threads.register(name);
    }

    /// `init()`: locks the level universe, computes aggregate masks, sets
    /// `globalLevel = TL_DEFAULT`, and registers the `trace` shell command
    /// against `server`.
    pub fn init(self: &Arc<Self>, server: &Server) {
        {
            let mut state = self.state.lock().expect("trace state mutex poisoned");
            state.levels.init();
            state.global_level = state.levels.tl_default();
            state.initialized = true;
        }

        let engine = self.clone();
        let callback: pshell_server::Callback = Arc::new(move |args, out| engine.handle_command(args, out));
        if let Err(err) = server.add_command(
            "trace",
            "Configure the dynamic trace filter",
            Some("on | off | filter ... | level ... | local ... | global ... | file ... | function ... | thread ... | show ..."),
            1,
            8,
            true,
            callback,
        ) {
            warn!(self.logger, "failed to register trace command"; "error" => %err);
        }
    }

    pub fn watch(&self, symbol: &str, read: ValueReader, width: u8, format_spec: &str, control: Control) -> Result<(), TraceError> {
        let mut state = self.state.lock().expect("trace state mutex poisoned");
        let watch = Watchpoint::new(symbol, read, width, format_spec, control).map_err(|err| {
            warn!(self.logger, "watch rejected"; "symbol" => symbol, "width" => err.0);
            TraceError::from(err)
        })?;
        state.watchpoint = Some(watch);
        Ok(())
    }

    pub fn callback(&self, callback: ConditionFn, control: Control) {
        self.state.lock().expect("trace state mutex poisoned").callback = Some(ConditionCallback::new(callback, control));
    }

    /// `isFilterPassed(file, line, function, level) -> bool` (spec.md
    /// §4.7), the hot-path evaluation. `level` names a registered level.
    pub fn is_filter_passed(&self, file: &str, line: u32, function: &str, level: &str) -> bool {
        let mut state = self.state.lock().expect("trace state mutex poisoned");

        if let Some(watch) = state.watchpoint.as_mut() {
            if let Some(transition) = watch.poll(file, line, function) {
                let (symbol, format_spec, abort) = (watch.symbol.clone(), watch.format_spec.clone(), watch.should_abort(true));
                let (prev_file, prev_line, prev_function) = &transition.previous_site;
                let (cur_file, cur_line, cur_function) = &transition.current_site;
                info!(self.logger, "watch transition: previous value";
                    "symbol" => &symbol, "format" => &format_spec, "value" => transition.previous_value,
                    "file" => prev_file, "line" => prev_line, "function" => prev_function);
                info!(self.logger, "watch transition: current value";
                    "symbol" => &symbol, "format" => &format_spec, "value" => transition.current_value,
                    "file" => cur_file, "line" => cur_line, "function" => cur_function);
                drop(state);
                if abort {
                    panic!("trace watchpoint '{}' triggered ABORT control policy", symbol);
                }
                return false;
            }
        }

        let (level_mask, level_index) = match state.levels.find_by_name(level) {
            Some(found) => (found.mask, found.index),
            None => return false,
        };

        let base_result = evaluate_ordinary(&mut state, file, line, function, level_mask, level_index);

        let callback_fired = match state.callback.as_mut() {
            Some(cb) => cb.poll(),
            None => false,
        };
        if callback_fired {
            let abort = state.callback.as_ref().map(|cb| cb.should_abort(true)).unwrap_or(false);
            info!(self.logger, "condition callback transition"; "file" => file, "line" => line, "function" => function);
            drop(state);
            if abort {
                panic!("trace condition callback triggered ABORT control policy");
            }
            return false;
        }

        base_result
    }

    fn handle_command(&self, args: &[String], out: &mut dyn Write) {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut state = self.state.lock().expect("trace state mutex poisoned");
        run_trace_command(&mut state, &args, out);
    }
}

fn evaluate_ordinary(state: &mut EngineState, file: &str, line: u32, function: &str, level_mask: u32, level_index: usize) -> bool {
    if !state.trace_enabled {
        return false;
    }
    if !state.filter_enabled {
        return state.hierarchical_level >= level_index;
    }
    if level_mask & state.levels.tl_unmaskable() != 0 {
        return true;
    }

    if state.local_filter_enabled {
        let mut any_matched = false;
        let mut all_pass = true;

        if state.file_filter_enabled {
            if let Some(filter) = state.files.get(&file.to_string()) {
                any_matched = true;
                all_pass &= filter.passes(line, level_mask);
            }
        }
        if state.function_filter_enabled {
            if let Some(filter) = state.functions.get(&function.to_string()) {
                any_matched = true;
                all_pass &= filter.passes(level_mask);
            }
        }
        if state.thread_filter_enabled {
            let tid = std::thread::current().id();
            if let Some(filter) = state.thread_axis.get(&tid) {
                any_matched = true;
                all_pass &= filter.passes(level_mask);
            }
        }

        if !any_matched {
            return state.global_filter_enabled && (level_mask & state.global_level != 0);
        }
        return all_pass;
    }

    state.global_filter_enabled && (level_mask & state.global_level != 0)
}

fn run_trace_command(state: &mut EngineState, args: &[&str], out: &mut dyn Write) {
    if args.is_empty() {
        let _ = write!(out, "PSHELL_ERROR: trace requires a sub-command");
        return;
    }

    match abbreviate(args[0], &["on", "off", "filter", "level", "local", "global", "file", "function", "thread", "show"]) {
        Some("on") => state.trace_enabled = true,
        Some("off") => state.trace_enabled = false,
        Some("filter") => handle_toggle_word(args.get(1).copied(), &mut state.filter_enabled, out),
        Some("level") => handle_level(state, args.get(1).copied(), out),
        Some("local") => handle_toggle_word(args.get(1).copied(), &mut state.local_filter_enabled, out),
        Some("global") => handle_global(state, &args[1..], out),
        Some("file") => handle_axis_file(state, &args[1..], out),
        Some("function") => handle_axis_function(state, &args[1..], out),
        Some("thread") => handle_axis_thread(state, &args[1..], out),
        Some("show") => handle_show(state, args.get(1).copied(), args.get(2).copied(), out),
        _ => {
            let _ = write!(out, "PSHELL_ERROR: unrecognized trace sub-command '{}'", args[0]);
        }
    }
}

fn abbreviate<'a>(token: &str, candidates: &[&'a str]) -> Option<&'a str> {
    if let Some(exact) = candidates.iter().find(|c| **c == token) {
        return Some(*exact);
    }
    let matches: Vec<&&str> = candidates.iter().filter(|c| c.starts_with(token)).collect();
    match matches.len() {
        1 => Some(*matches[0]),
        _ => None,
    }
}

fn handle_toggle_word(word: Option<&str>, toggle: &mut bool, out: &mut dyn Write) {
    match word {
        Some("on") => *toggle = true,
        Some("off") => *toggle = false,
        _ => {
            let _ = write!(out, "PSHELL_ERROR: expected 'on' or 'off'");
        }
    }
}

fn handle_level(state: &mut EngineState, word: Option<&str>, out: &mut dyn Write) {
    state.filter_enabled = false;
    match word {
        Some("all") => state.hierarchical_level = usize::MAX,
        Some("default") => {
            state.hierarchical_level = state.levels.levels().filter(|l| l.is_default).map(|l| l.index).max().unwrap_or(0)
        }
        Some(n) => match n.parse::<usize>() {
            Ok(level) => state.hierarchical_level = level,
            Err(_) => {
                let _ = write!(out, "PSHELL_ERROR: invalid level '{}'", n);
            }
        },
        None => {
            let _ = write!(out, "PSHELL_ERROR: trace level requires 'all', 'default' or a number");
        }
    }
}

fn handle_global(state: &mut EngineState, args: &[&str], out: &mut dyn Write) {
    if args.is_empty() {
        let _ = write!(out, "PSHELL_ERROR: trace global requires an argument");
        return;
    }
    match args[0] {
        "on" => {
            state.global_filter_enabled = true;
            return;
        }
        "off" => {
            state.global_filter_enabled = false;
            return;
        }
        _ => {}
    }

    for spec in args {
        let (sign, rest) = match spec.strip_prefix('+') {
            Some(rest) => (Some('+'), rest),
            None => match spec.strip_prefix('-') {
                Some(rest) => (Some('-'), rest),
                None => (None, *spec),
            },
        };

        let mask = match state.levels.resolve_mask(rest) {
            Some(mask) => mask,
            None => {
                let _ = write!(out, "PSHELL_ERROR: unknown trace level '{}'", rest);
                continue;
            }
        };

        match sign {
            Some('+') => state.global_level |= mask,
            Some('-') => state.global_level &= !(mask & !state.levels.tl_unmaskable()),
            _ => state.global_level = mask | state.levels.tl_unmaskable(),
        }
    }
}

/// Parse `[+|-]<name>[:<lineSpec>][:<levelSpec>]` (file axis) or
/// `[+|-]<name>[:<levelSpec>]` (function/thread axes, no line spec). A file
/// spec with exactly two colon-separated fields is always read as
/// `name:lineSpec`, never `name:levelSpec` - the level defaults in that case.
struct AxisSpec<'a> {
    remove: bool,
    name: &'a str,
    line_spec: Option<&'a str>,
    level_spec: Option<&'a str>,
}

fn parse_axis_spec(spec: &str, allow_lines: bool) -> AxisSpec<'_> {
    let (remove, rest) = match spec.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, spec.strip_prefix('+').unwrap_or(spec)),
    };

    let parts: Vec<&str> = rest.split(':').collect();
    let name = parts.first().copied().unwrap_or("");

    if allow_lines {
        AxisSpec {
            remove,
            name,
            line_spec: parts.get(1).copied(),
            level_spec: parts.get(2).copied(),
        }
    } else {
        AxisSpec {
            remove,
            name,
            line_spec: None,
            level_spec: parts.get(1).copied(),
        }
    }
}

fn parse_line_ranges(spec: &str) -> Vec<LineRange> {
    spec.split(',')
        .filter_map(|piece| {
            let mut parts = piece.splitn(2, '-');
            let start: u32 = parts.next()?.trim().parse().ok()?;
            let end = match parts.next() {
                Some(end) => end.trim().parse().ok()?,
                None => start,
            };
            Some(LineRange { start, end })
        })
        .collect()
}

fn handle_axis_file(state: &mut EngineState, args: &[&str], out: &mut dyn Write) {
    if args.first() == Some(&"on") {
        state.file_filter_enabled = true;
        return;
    }
    if args.first() == Some(&"off") {
        state.file_filter_enabled = false;
        return;
    }

    for spec in args {
        let parsed = parse_axis_spec(spec, true);
        if parsed.remove {
            state.files.remove(&parsed.name.to_string());
            if state.files.is_empty() && state.functions.is_empty() && state.thread_axis.is_empty() {
                state.local_filter_enabled = false;
            }
            continue;
        }

        let level_spec = parsed.level_spec.unwrap_or("default");
        let mask = match state.levels.resolve_mask(level_spec) {
            Some(mask) => mask,
            None => {
                let _ = write!(out, "PSHELL_ERROR: unknown trace level '{}'", level_spec);
                continue;
            }
        };
        let ranges = parsed.line_spec.map(parse_line_ranges).unwrap_or_default();

        if state.files.insert(parsed.name.to_string(), FileFilter { mask, ranges }) {
            state.file_filter_enabled = true;
            state.local_filter_enabled = true;
        } else {
            let _ = write!(out, "PSHELL_ERROR: file filter table is full");
        }
    }
}

fn handle_axis_function(state: &mut EngineState, args: &[&str], out: &mut dyn Write) {
    if args.first() == Some(&"on") {
        state.function_filter_enabled = true;
        return;
    }
    if args.first() == Some(&"off") {
        state.function_filter_enabled = false;
        return;
    }

    for spec in args {
        let parsed = parse_axis_spec(spec, false);
        if parsed.remove {
            state.functions.remove(&parsed.name.to_string());
            if state.files.is_empty() && state.functions.is_empty() && state.thread_axis.is_empty() {
                state.local_filter_enabled = false;
            }
            continue;
        }

        let level_spec = parsed.level_spec.unwrap_or("default");
        let mask = match state.levels.resolve_mask(level_spec) {
            Some(mask) => mask,
            None => {
                let _ = write!(out, "PSHELL_ERROR: unknown trace level '{}'", level_spec);
                continue;
            }
        };

        if state.functions.insert(parsed.name.to_string(), FunctionFilter { mask }) {
            state.function_filter_enabled = true;
            state.local_filter_enabled = true;
        } else {
            let _ = write!(out, "PSHELL_ERROR: function filter table is full");
        }
    }
}

fn handle_axis_thread(state: &mut EngineState, args: &[&str], out: &mut dyn Write) {
    if args.first() == Some(&"on") {
        state.thread_filter_enabled = true;
        return;
    }
    if args.first() == Some(&"off") {
        state.thread_filter_enabled = false;
        return;
    }

    for spec in args {
        let parsed = parse_axis_spec(spec, false);
        let tid = match state.threads.id_for(parsed.name) {
            Some(tid) => tid,
            None => {
                let _ = write!(out, "PSHELL_ERROR: unregistered thread '{}'", parsed.name);
                continue;
            }
        };

        if parsed.remove {
            state.thread_axis.remove(&tid);
            if state.files.is_empty() && state.functions.is_empty() && state.thread_axis.is_empty() {
                state.local_filter_enabled = false;
            }
            continue;
        }

        let level_spec = parsed.level_spec.unwrap_or("default");
        let mask = match state.levels.resolve_mask(level_spec) {
            Some(mask) => mask,
            None => {
                let _ = write!(out, "PSHELL_ERROR: unknown trace level '{}'", level_spec);
                continue;
            }
        };

        if state.thread_axis.insert(tid, ThreadFilter { mask }) {
            state.thread_filter_enabled = true;
            state.local_filter_enabled = true;
        } else {
            let _ = write!(out, "PSHELL_ERROR: thread filter table is full");
        }
    }
}

fn handle_show(state: &EngineState, what: Option<&str>, which: Option<&str>, out: &mut dyn Write) {
    match what {
        Some("config") => {
            let _ = write!(
                out,
                "trace: {}\nfilter: {}\nlocal: {}\nglobal: {}\nfile: {}\nfunction: {}\nthread: {}\nhierarchicalLevel: {}",
                state.trace_enabled,
                state.filter_enabled,
                state.local_filter_enabled,
                state.global_filter_enabled,
                state.file_filter_enabled,
                state.function_filter_enabled,
                state.thread_filter_enabled,
                state.hierarchical_level
            );
        }
        Some("levels") => {
            let rendered: Vec<String> = state
                .levels
                .levels()
                .map(|lvl| format!("{} (default={}, maskable={})", lvl.name, lvl.is_default, lvl.is_maskable))
                .collect();
            let _ = write!(out, "{}", rendered.join("\n"));
        }
        Some("threads") => {
            let _ = write!(out, "{}", which.unwrap_or("<all threads>"));
        }
        Some("symbols") => {
            let files: Vec<&str> = state.files.keys().map(String::as_str).collect();
            let functions: Vec<&str> = state.functions.keys().map(String::as_str).collect();
            let _ = write!(out, "files: {}\nfunctions: {}", files.join(","), functions.join(","));
        }
        _ => {
            let _ = write!(out, "PSHELL_ERROR: trace show requires config|levels|threads|symbols");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pshell_support::logging::discard_logger;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn engine_with_levels() -> Arc<TraceFilter> {
        let engine = TraceFilter::new(discard_logger());
        engine.add_level("INFO", 3, false, true).unwrap();
        engine.add_level("DEBUG", 4, false, true).unwrap();
        engine.add_level("ERROR", 0, true, false).unwrap();
        {
            let mut state = engine.state.lock().unwrap();
            state.levels.init();
            state.global_level = state.levels.tl_default();
            state.initialized = true;
        }
        engine
    }

    #[test]
    fn unmaskable_level_always_passes() {
        let engine = engine_with_levels();
        assert!(engine.is_filter_passed("f.rs", 1, "func", "ERROR"));
    }

    #[test]
    fn global_level_gate_matches_scenario_five() {
        let engine = engine_with_levels();
        let mut out = Vec::new();
        engine.handle_command(&["global".into(), "INFO".into()], &mut out);

        assert!(engine.is_filter_passed("f.rs", 1, "func", "INFO"));
        assert!(!engine.is_filter_passed("f.rs", 1, "func", "DEBUG"));
        assert!(engine.is_filter_passed("f.rs", 1, "func", "ERROR"));
    }

    #[test]
    fn file_filter_gates_by_line_range() {
        let engine = engine_with_levels();
        let mut out = Vec::new();
        engine.handle_command(&["file".into(), "f.rs:10-20:INFO".into()], &mut out);

        assert!(engine.is_filter_passed("f.rs", 15, "func", "INFO"));
        assert!(!engine.is_filter_passed("f.rs", 99, "func", "INFO"));
        // A different file has no matching filter on any axis, falls
        // through to the global mask (off by default here).
        assert!(!engine.is_filter_passed("other.rs", 15, "func", "INFO"));
    }

    #[test]
    fn watchpoint_suppresses_ordinary_trace_on_change() {
        let engine = engine_with_levels();
        let value = Arc::new(AtomicU64::new(0));
        let reader: ValueReader = {
            let value = value.clone();
            Arc::new(move || value.load(Ordering::SeqCst))
        };
        engine.watch("x", reader, 4, "0x%08x", Control::Continuous).unwrap();

        // First site only primes the baseline; unchanged value never fires.
        assert!(!engine.is_filter_passed("first.rs", 1, "setup", "ERROR"));
        assert!(!engine.is_filter_passed("first.rs", 1, "setup", "ERROR"));

        // A second site mutates the watched value; the transition is
        // suppressed from the ordinary result but reported as two watch
        // lines (previous site/value, current site/value).
        value.store(42, Ordering::SeqCst);
        assert!(!engine.is_filter_passed("second.rs", 7, "mutate", "ERROR"));
    }

    #[test]
    fn filter_off_then_on_restores_hierarchical_behaviour() {
        let engine = engine_with_levels();
        let mut out = Vec::new();
        engine.handle_command(&["filter".into(), "off".into()], &mut out);
        assert!(engine.is_filter_passed("f.rs", 1, "func", "ERROR"));

        out.clear();
        engine.handle_command(&["filter".into(), "on".into()], &mut out);
        assert!(engine.is_filter_passed("f.rs", 1, "func", "ERROR"));
    }
}
