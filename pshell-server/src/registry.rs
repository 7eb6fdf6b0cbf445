//! Command Registry (spec.md §4.2). An ordered table of registered
//! callbacks with validation and help formatting.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// A registered command's callback. Writes its output directly into the
/// server's reply buffer. `Arc` gives us cheap cloning and, via
/// `Arc::ptr_eq`, a way to detect "the same callback bound twice" the way
/// the original C API detects identical function pointers.
pub type Callback = Arc<dyn Fn(&[String], &mut dyn Write) + Send + Sync>;

#[derive(Debug)]
pub enum RegistryError {
    InvalidArgument(String),
    Duplicate(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            RegistryError::Duplicate(msg) => write!(f, "duplicate: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

pub struct Command {
    pub name: String,
    pub description: String,
    pub usage: Option<String>,
    pub min_args: usize,
    pub max_args: usize,
    pub show_usage: bool,
    pub(crate) callback: Callback,
    /// Set for a user command that collides with a native name (`help`,
    /// `quit`, `batch`); such a command is only reachable from one-shot /
    /// `run_command` dispatch, never interactively.
    pub shadowed_native: bool,
}

impl Command {
    /// `Usage: <name> <usage>` or `Usage: <name>` with no usage registered.
    pub fn usage_line(&self) -> String {
        match &self.usage {
            Some(usage) => format!("Usage: {} {}", self.name, usage),
            None => format!("Usage: {}", self.name),
        }
    }
}

pub enum FindResult<'a> {
    Unique(&'a Command),
    Ambiguous(Vec<&'a str>),
    Help,
    NotFound,
}

const NATIVE_NAMES: [&str; 3] = ["help", "quit", "batch"];
const HELP_ALIASES: [&str; 4] = ["?", "-h", "-help", "--help"];

pub struct Registry {
    commands: Vec<Command>,
    max_command_length: usize,
    allow_duplicate_function: bool,
    natives_installed: bool,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            commands: Vec::new(),
            max_command_length: 0,
            allow_duplicate_function: false,
            natives_installed: false,
        }
    }

    pub fn allow_duplicate_function(&mut self, allow: bool) {
        self.allow_duplicate_function = allow;
    }

    pub fn max_command_length(&self) -> usize {
        self.max_command_length
    }

    /// Returns `Ok(true)` when the registered name shadows a native
    /// (`help`/`quit`/`batch`) - the command is still admitted, but the
    /// caller is expected to log a registration warning (spec.md §4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        name: &str,
        description: &str,
        usage: Option<&str>,
        min_args: usize,
        mut max_args: usize,
        show_usage: bool,
        callback: Callback,
    ) -> Result<bool, RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument("command name must not be empty".into()));
        }
        if description.is_empty() {
            return Err(RegistryError::InvalidArgument("command description must not be empty".into()));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidArgument(format!(
                "command name '{}' must not contain whitespace",
                name
            )));
        }

        if max_args == 0 && min_args > 0 {
            max_args = min_args;
        }

        if min_args > max_args {
            return Err(RegistryError::InvalidArgument(format!(
                "minArgs ({}) must be <= maxArgs ({})",
                min_args, max_args
            )));
        }

        if min_args == 0 && max_args == 0 && usage.is_some() {
            return Err(RegistryError::InvalidArgument(
                "a zero-argument command must not declare a usage string".into(),
            ));
        }

        if max_args > 0 && usage.is_none() {
            return Err(RegistryError::InvalidArgument(
                "a command accepting arguments must declare a usage string".into(),
            ));
        }

        if self.commands.iter().any(|cmd| cmd.name == name) {
            return Err(RegistryError::Duplicate(format!("command '{}' already registered", name)));
        }

        if !self.allow_duplicate_function {
            if let Some(existing) = self.commands.iter().find(|cmd| Arc::ptr_eq(&cmd.callback, &callback)) {
                return Err(RegistryError::Duplicate(format!(
                    "callback already bound to command '{}'",
                    existing.name
                )));
            }
        }

        let shadowed_native = NATIVE_NAMES.contains(&name);

        self.max_command_length = self.max_command_length.max(name.len());
        self.commands.push(Command {
            name: name.to_string(),
            description: description.to_string(),
            usage: usage.map(str::to_string),
            min_args,
            max_args,
            show_usage,
            callback,
            shadowed_native,
        });

        Ok(shadowed_native)
    }

    /// Insert `help`/`quit`/`batch` and move them to the front of the
    /// table. `supports_quit`/`supports_batch` gate native commands by
    /// server kind (e.g. the local loopback kind supports `quit`, a
    /// datagram server does not).
    pub fn install_natives(&mut self, help: Callback, quit: Option<Callback>, batch: Option<Callback>) {
        if self.natives_installed {
            return;
        }
        self.natives_installed = true;

        let mut natives = Vec::new();
        natives.push(Command {
            name: "help".to_string(),
            description: "Show command help".to_string(),
            usage: None,
            min_args: 0,
            max_args: 0,
            show_usage: false,
            callback: help,
            shadowed_native: false,
        });

        if let Some(quit) = quit {
            natives.push(Command {
                name: "quit".to_string(),
                description: "Terminate the interactive session".to_string(),
                usage: None,
                min_args: 0,
                max_args: 0,
                show_usage: false,
                callback: quit,
                shadowed_native: false,
            });
        }

        if let Some(batch) = batch {
            natives.push(Command {
                name: "batch".to_string(),
                description: "Run commands from a batch file".to_string(),
                usage: Some("<filename> [rate=<sec>] [repeat=<n>|forever] [clear]".to_string()),
                min_args: 1,
                max_args: 4,
                show_usage: true,
                callback: batch,
                shadowed_native: false,
            });
        }

        for native in natives.into_iter().rev() {
            self.max_command_length = self.max_command_length.max(native.name.len());
            self.commands.insert(0, native);
        }
    }

    /// Resolve `prefix` against the registry: exact/unambiguous-abbreviation
    /// match, the reserved help aliases, ambiguous, or not found. On an exact
    /// name collision between a native and a user command that shadows it,
    /// the native always wins - this is the lookup the interactive terminal
    /// and `runCommand` use, so a shadowing user command is never reachable
    /// this way (spec.md §4.2: "not interactively").
    pub fn find(&self, prefix: &str) -> FindResult<'_> {
        self.find_impl(prefix, false)
    }

    /// Same resolution as [`find`](Self::find), except on an exact collision
    /// the shadowing *user* command wins over the native it shadows. Used by
    /// wire-frame dispatch (`USER_COMMAND`/`CONTROL_COMMAND`), the
    /// command-line / one-shot path a shadowing registration is admitted for
    /// (spec.md §4.2).
    pub fn find_one_shot(&self, prefix: &str) -> FindResult<'_> {
        self.find_impl(prefix, true)
    }

    fn find_impl(&self, prefix: &str, prefer_shadowed: bool) -> FindResult<'_> {
        if HELP_ALIASES.contains(&prefix) {
            return FindResult::Help;
        }

        let matches: Vec<&Command> = self.commands.iter().filter(|cmd| cmd.name.starts_with(prefix)).collect();

        match matches.len() {
            0 => FindResult::NotFound,
            1 => FindResult::Unique(matches[0]),
            _ => {
                let exact: Vec<&Command> = matches.iter().copied().filter(|cmd| cmd.name == prefix).collect();
                match exact.len() {
                    0 => FindResult::Ambiguous(matches.iter().map(|cmd| cmd.name.as_str()).collect()),
                    _ if prefer_shadowed && exact.iter().any(|cmd| cmd.shadowed_native) => {
                        FindResult::Unique(exact.into_iter().find(|cmd| cmd.shadowed_native).unwrap())
                    }
                    _ => FindResult::Unique(exact[0]),
                }
            }
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// `<name padded>  -  <description>` per line.
    pub fn render_help(&self) -> String {
        let mut out = String::new();
        for cmd in &self.commands {
            out.push_str(&format!(
                "{:width$}  -  {}\n",
                cmd.name,
                cmd.description,
                width = self.max_command_length
            ));
        }
        out
    }

    /// Names separated by a single delimiter, for client-side TAB completion.
    pub fn render_names(&self, delimiter: char) -> String {
        self.commands
            .iter()
            .map(|cmd| cmd.name.as_str())
            .collect::<Vec<_>>()
            .join(&delimiter.to_string())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        Arc::new(|_args, _out| {})
    }

    #[test]
    fn rejects_whitespace_name() {
        let mut reg = Registry::new();
        let err = reg.add("bad name", "desc", None, 0, 0, false, noop()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[test]
    fn raises_max_args_to_min() {
        let mut reg = Registry::new();
        reg.add("cmd", "desc", Some("<x>"), 2, 0, true, noop()).unwrap();
        let cmd = match reg.find("cmd") {
            FindResult::Unique(cmd) => cmd,
            _ => panic!("expected unique match"),
        };
        assert_eq!(cmd.max_args, 2);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = Registry::new();
        reg.add("cmd", "desc", None, 0, 0, false, noop()).unwrap();
        let err = reg.add("cmd", "other desc", None, 0, 0, false, noop()).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[test]
    fn duplicate_callback_rejected_unless_allowed() {
        let mut reg = Registry::new();
        let cb = noop();
        reg.add("one", "desc", None, 0, 0, false, cb.clone()).unwrap();
        let err = reg.add("two", "desc", None, 0, 0, false, cb.clone()).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));

        reg.allow_duplicate_function(true);
        reg.add("three", "desc", None, 0, 0, false, cb).unwrap();
    }

    #[test]
    fn prefix_lookup_ambiguous() {
        let mut reg = Registry::new();
        reg.add("start", "desc", None, 0, 0, false, noop()).unwrap();
        reg.add("stop", "desc", None, 0, 0, false, noop()).unwrap();
        assert!(matches!(reg.find("st"), FindResult::Ambiguous(_)));
        assert!(matches!(reg.find("sta"), FindResult::Unique(_)));
    }

    #[test]
    fn help_aliases_resolve() {
        let reg = Registry::new();
        assert!(matches!(reg.find("?"), FindResult::Help));
        assert!(matches!(reg.find("--help"), FindResult::Help));
    }

    #[test]
    fn user_command_shadowing_native_is_admitted_but_only_reachable_one_shot() {
        let mut reg = Registry::new();
        let shadowed = reg.add("quit", "a user command also named quit", None, 0, 0, false, noop()).unwrap();
        assert!(shadowed);

        reg.install_natives(noop(), Some(noop()), None);

        match reg.find("quit") {
            FindResult::Unique(cmd) => assert!(!cmd.shadowed_native, "interactive lookup must resolve to the native"),
            other => panic!("expected unique match, got {:?}", std::mem::discriminant(&other)),
        }

        match reg.find_one_shot("quit") {
            FindResult::Unique(cmd) => assert!(cmd.shadowed_native, "one-shot lookup must resolve to the shadowing user command"),
            other => panic!("expected unique match, got {:?}", std::mem::discriminant(&other)),
        }
    }

    #[test]
    fn usage_required_when_args_expected() {
        let mut reg = Registry::new();
        let err = reg.add("cmd", "desc", None, 1, 2, true, noop()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[test]
    fn usage_forbidden_for_zero_arg_command() {
        let mut reg = Registry::new();
        let err = reg.add("cmd", "desc", Some("<x>"), 0, 0, false, noop()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }
}
