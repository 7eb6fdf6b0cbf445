//! Local loopback transport (spec.md §4.4): no socket at all, reads from
//! the host process's own stdin and writes to its own stdout.

use std::io::{self, Write};

pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> LocalTransport {
        LocalTransport
    }

    pub fn write_prompt(&self, prompt: &str) -> io::Result<()> {
        print!("{}", prompt);
        io::stdout().flush()
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        println!("{}", line);
        Ok(())
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        LocalTransport::new()
    }
}
