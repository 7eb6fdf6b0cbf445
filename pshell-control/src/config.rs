//! Control-client configuration file (spec.md §6.4): `pshell-control.conf`
//! lines of the form `<controlName>.<option>=<value>` override `host`,
//! `port`/transport, and default timeout before `connect`.

use crate::session::UNIX_CONTROL;
use pshell_support::paths::find_file;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::time::Duration;

const CONFIG_FILENAME: &str = "pshell-control.conf";
const DEFAULT_CONFIG_DIR: &str = "/etc/pshell";

#[derive(Debug, Clone, Default)]
pub struct ControlConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout: Option<Duration>,
}

pub fn load_control_config() -> io::Result<HashMap<String, ControlConfig>> {
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
        let (control_name, option) = match key.trim().split_once('.') {
            Some(pair) => pair,
            None => continue,
        };
        let value = value.trim();

        let entry = result.entry(control_name.to_string()).or_insert_with(ControlConfig::default);
        apply_option(entry, option.trim(), value);
    }

    Ok(result)
}

fn apply_option(entry: &mut ControlConfig, option: &str, value: &str) {
    match option {
        "udp" => entry.host = Some(value.to_string()),
        "unix" => {
            entry.host = Some(value.to_string());
            entry.port = Some(UNIX_CONTROL);
        }
        "port" => entry.port = value.parse().ok(),
        "timeout" => {
            entry.timeout = if value == "none" {
                Some(Duration::from_secs(0))
            } else {
                value.parse::<u64>().ok().map(Duration::from_millis)
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_option_sets_sentinel_port() {
        let mut entry = ControlConfig::default();
        apply_option(&mut entry, "unix", "myServer");
        assert_eq!(entry.host.as_deref(), Some("myServer"));
        assert_eq!(entry.port, Some(UNIX_CONTROL));
    }

    #[test]
    fn timeout_none_means_zero() {
        let mut entry = ControlConfig::default();
        apply_option(&mut entry, "timeout", "none");
        assert_eq!(entry.timeout, Some(Duration::from_secs(0)));
    }
}
