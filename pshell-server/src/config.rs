//! Server configuration file and startup files (spec.md §6.2).
//!
//! `pshell-server.conf` lines have the form `<serverName>.<option>=<value>`;
//! a companion `<serverName>.startup` file, if present, is fed through the
//! dispatcher non-interactively once at process start.

use pshell_support::paths::{candidate_dirs, find_file};
use std::collections::HashMap;
use std::fs;
use std::io;

const CONFIG_FILENAME: &str = "pshell-server.conf";
const DEFAULT_CONFIG_DIR: &str = "/etc/pshell";
const DEFAULT_STARTUP_DIR: &str = "/etc/pshell/startup";

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub title: Option<String>,
    pub banner: Option<String>,
    pub prompt: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub kind: Option<String>,
    pub timeout_mins: Option<u64>,
}

/// Parse every `<serverName>.<option>=<value>` line in `pshell-server.conf`,
/// grouped by server name. Missing file is not an error - servers simply
/// use their compiled-in defaults (spec.md §6.2).
pub fn load_server_config() -> io::Result<HashMap<String, ServerConfig>> {
    let mut result = HashMap::new();
    let path = match find_file("PSHELL_CONFIG_DIR", DEFAULT_CONFIG_DIR, CONFIG_FILENAME) {
        Some(path) => path,
        None => return Ok(result),
    };

    let contents = fs::read_to_string(path)?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = match line.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        let (server_name, option) = match key.trim().split_once('.') {
            Some(pair) => pair,
            None => continue,
        };
        let value = value.trim();

        let entry = result.entry(server_name.to_string()).or_insert_with(ServerConfig::default);
        apply_option(entry, option.trim(), value);
    }

    Ok(result)
}

fn apply_option(entry: &mut ServerConfig, option: &str, value: &str) {
    match option {
        "title" => entry.title = Some(value.to_string()),
        "banner" => entry.banner = Some(value.to_string()),
        "prompt" => entry.prompt = Some(value.to_string()),
        "host" => entry.host = Some(value.to_string()),
        "port" => entry.port = value.parse().ok(),
        "type" => entry.kind = Some(value.to_string()),
        "timeout" => entry.timeout_mins = value.parse().ok(),
        _ => {}
    }
}

/// Lines of a `<serverName>.startup` file, comments and blanks stripped, in
/// file order - ready to feed through `Server::run_command` once at start.
pub fn load_startup_lines(server_name: &str) -> io::Result<Vec<String>> {
    let filename = format!("{}.startup", server_name);
    let path = match find_file("PSHELL_STARTUP_DIR", DEFAULT_STARTUP_DIR, &filename) {
        Some(path) => path,
        None => return Ok(Vec::new()),
    };

    Ok(non_comment_lines(&fs::read_to_string(path)?))
}

pub(crate) fn non_comment_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Directories searched for startup/batch/config files, for diagnostics.
pub fn search_dirs(env_var: &str, compile_time_default: &str) -> Vec<std::path::PathBuf> {
    candidate_dirs(env_var, compile_time_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_per_server_options() {
        let contents = "\
# comment
myServer.title=My Title
myServer.port=9090
other.type=unix
";
        let mut result = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').unwrap();
            let (server_name, option) = key.trim().split_once('.').unwrap();
            let entry = result.entry(server_name.to_string()).or_insert_with(ServerConfig::default);
            apply_option(entry, option.trim(), value.trim());
        }

        assert_eq!(result["myServer"].title.as_deref(), Some("My Title"));
        assert_eq!(result["myServer"].port, Some(9090));
        assert_eq!(result["other"].kind.as_deref(), Some("unix"));
    }

    #[test]
    fn strips_comments_and_blanks() {
        let lines = non_comment_lines("echo one\n\n# comment\n   \necho two\n");
        assert_eq!(lines, vec!["echo one".to_string(), "echo two".to_string()]);
    }
}
