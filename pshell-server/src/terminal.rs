//! Interactive Terminal (spec.md §4.4): a VT100/Telnet line editor with
//! history, TAB completion and an idle timeout, driven one byte at a time
//! so it can sit on top of either a real TCP stream or the local loopback
//! standard input.

use std::collections::VecDeque;

pub const LINE_LENGTH_CAP: usize = 180;
pub const HISTORY_CAPACITY: usize = 256;
pub const DEFAULT_IDLE_TIMEOUT_MINS: u64 = 10;

const BELL: u8 = 0x07;

/// A single interpreted keystroke, after ANSI escape sequences and control
/// characters have been resolved to their semantic action (spec.md §4.4 key
/// table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Commit,
    Home,
    End,
    Left,
    Right,
    HistoryPrev,
    HistoryNext,
    Backspace,
    DeleteWordBack,
    ClearLine,
    KillToEnd,
    Redraw,
    Tab,
    Interrupt,
    DeleteUnderCursor,
    Printable(char),
}

/// Byte-at-a-time decoder for ANSI escapes, Telnet IAC sequences and
/// control keys. Telnet option negotiation bytes are consumed and ignored
/// (spec.md §4.4).
#[derive(Default)]
pub struct KeyDecoder {
    state: DecoderState,
}

#[derive(Default, PartialEq, Eq)]
enum DecoderState {
    #[default]
    Normal,
    Esc,
    EscBracket,
    Telnet(u8),
}

impl KeyDecoder {
    pub fn new() -> KeyDecoder {
        KeyDecoder::default()
    }

    /// Feed one byte in; returns a resolved key once a full sequence has
    /// been consumed, or `None` while mid-sequence / for ignored bytes.
    pub fn feed(&mut self, byte: u8) -> Option<Key> {
        match self.state {
            DecoderState::Telnet(remaining) => {
                if remaining <= 1 {
                    self.state = DecoderState::Normal;
                } else {
                    self.state = DecoderState::Telnet(remaining - 1);
                }
                None
            }
            DecoderState::Esc => {
                self.state = if byte == b'[' { DecoderState::EscBracket } else { DecoderState::Normal };
                None
            }
            DecoderState::EscBracket => {
                self.state = DecoderState::Normal;
                match byte {
                    b'A' => Some(Key::HistoryPrev),
                    b'B' => Some(Key::HistoryNext),
                    b'C' => Some(Key::Right),
                    b'D' => Some(Key::Left),
                    b'H' => Some(Key::Home),
                    b'F' => Some(Key::End),
                    _ => None,
                }
            }
            DecoderState::Normal => match byte {
                0xff => {
                    // IAC: consume the following command + option bytes.
                    self.state = DecoderState::Telnet(2);
                    None
                }
                0x1b => {
                    self.state = DecoderState::Esc;
                    None
                }
                b'\r' | b'\n' => Some(Key::Commit),
                0x01 => Some(Key::Home),
                0x05 => Some(Key::End),
                0x02 => Some(Key::Left),
                0x06 => Some(Key::Right),
                0x10 => Some(Key::HistoryPrev),
                0x0e => Some(Key::HistoryNext),
                0x08 | 0x7f => Some(Key::Backspace),
                0x17 => Some(Key::DeleteWordBack),
                0x15 => Some(Key::ClearLine),
                0x0b => Some(Key::KillToEnd),
                0x0c => Some(Key::Redraw),
                0x09 => Some(Key::Tab),
                0x03 => Some(Key::Interrupt),
                0x04 => Some(Key::DeleteUnderCursor),
                0x20..=0x7e => Some(Key::Printable(byte as char)),
                _ => None,
            },
        }
    }
}

/// Outcome of applying a `Key` to the line editor - what the server should
/// do next (echo bytes, ring the bell, dispatch the committed line, ...).
pub enum Outcome {
    /// Nothing visible changed.
    Idle,
    /// The line should be redrawn: `(prompt, line, cursor)`.
    Redraw,
    /// Ring the bell (no match / empty history / etc).
    Bell,
    /// The line was committed and should be dispatched.
    Commit(String),
    /// TAB produced a single unambiguous match; insert it (with trailing
    /// space) at the cursor.
    Complete(String),
    /// TAB produced more than one match; list them in a grid.
    CompleteList(Vec<String>),
}

pub struct LineEditor {
    buffer: Vec<u8>,
    cursor: usize,
    history: VecDeque<String>,
    history_cursor: Option<usize>,
    saved_line: String,
    last_tab_prefix: Option<String>,
}

impl LineEditor {
    pub fn new() -> LineEditor {
        LineEditor {
            buffer: Vec::new(),
            cursor: 0,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            history_cursor: None,
            saved_line: String::new(),
            last_tab_prefix: None,
        }
    }

    pub fn line(&self) -> &str {
        std::str::from_utf8(&self.buffer).unwrap_or("")
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn reset_tab_state(&mut self) {
        self.last_tab_prefix = None;
    }

    /// Apply a non-TAB key. TAB completion is driven separately via
    /// [`LineEditor::complete`] since it needs the live command name list.
    pub fn apply(&mut self, key: Key) -> Outcome {
        match key {
            Key::Tab => unreachable!("TAB is routed through LineEditor::complete"),
            Key::Commit => {
                let line = self.line().to_string();
                if !line.is_empty() {
                    if self.history.len() == HISTORY_CAPACITY {
                        self.history.pop_front();
                    }
                    self.history.push_back(line.clone());
                }
                self.buffer.clear();
                self.cursor = 0;
                self.history_cursor = None;
                self.reset_tab_state();
                Outcome::Commit(line)
            }
            Key::Home => {
                self.cursor = 0;
                self.reset_tab_state();
                Outcome::Redraw
            }
            Key::End => {
                self.cursor = self.buffer.len();
                self.reset_tab_state();
                Outcome::Redraw
            }
            Key::Left => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                }
                self.reset_tab_state();
                Outcome::Redraw
            }
            Key::Right => {
                if self.cursor < self.buffer.len() {
                    self.cursor += 1;
                }
                self.reset_tab_state();
                Outcome::Redraw
            }
            Key::HistoryPrev => {
                self.reset_tab_state();
                if self.history.is_empty() {
                    return Outcome::Bell;
                }
                let next_index = match self.history_cursor {
                    None => {
                        self.saved_line = self.line().to_string();
                        self.history.len() - 1
                    }
                    Some(0) => return Outcome::Bell,
                    Some(idx) => idx - 1,
                };
                self.history_cursor = Some(next_index);
                self.set_line(self.history[next_index].clone());
                Outcome::Redraw
            }
            Key::HistoryNext => {
                self.reset_tab_state();
                match self.history_cursor {
                    None => Outcome::Bell,
                    Some(idx) if idx + 1 < self.history.len() => {
                        self.history_cursor = Some(idx + 1);
                        self.set_line(self.history[idx + 1].clone());
                        Outcome::Redraw
                    }
                    Some(_) => {
                        self.history_cursor = None;
                        self.set_line(self.saved_line.clone());
                        Outcome::Redraw
                    }
                }
            }
            Key::Backspace => {
                self.reset_tab_state();
                if self.cursor > 0 {
                    self.buffer.remove(self.cursor - 1);
                    self.cursor -= 1;
                    Outcome::Redraw
                } else {
                    Outcome::Bell
                }
            }
            Key::DeleteUnderCursor => {
                self.reset_tab_state();
                if self.cursor < self.buffer.len() {
                    self.buffer.remove(self.cursor);
                    Outcome::Redraw
                } else {
                    Outcome::Bell
                }
            }
            Key::DeleteWordBack => {
                self.reset_tab_state();
                let start = self.cursor;
                let mut idx = start;
                while idx > 0 && self.buffer[idx - 1] == b' ' {
                    idx -= 1;
                }
                while idx > 0 && self.buffer[idx - 1] != b' ' {
                    idx -= 1;
                }
                self.buffer.drain(idx..start);
                self.cursor = idx;
                Outcome::Redraw
            }
            Key::ClearLine => {
                self.reset_tab_state();
                self.buffer.clear();
                self.cursor = 0;
                Outcome::Redraw
            }
            Key::KillToEnd => {
                self.reset_tab_state();
                self.buffer.truncate(self.cursor);
                Outcome::Redraw
            }
            Key::Redraw => Outcome::Redraw,
            Key::Interrupt => {
                self.reset_tab_state();
                Outcome::Bell
            }
            Key::Printable(c) => {
                self.reset_tab_state();
                if self.buffer.len() >= LINE_LENGTH_CAP {
                    return Outcome::Bell;
                }
                self.buffer.insert(self.cursor, c as u8);
                self.cursor += 1;
                Outcome::Redraw
            }
        }
    }

    fn set_line(&mut self, line: String) {
        self.buffer = line.into_bytes();
        self.cursor = self.buffer.len();
    }

    /// TAB completion against `names` (spec.md §4.4): single match
    /// auto-inserts with a trailing space, repeated TAB lists all matches,
    /// no matches rings the bell. Matching is case-insensitive prefix.
    pub fn complete(&mut self, names: &[String]) -> Outcome {
        let prefix = self.line().to_string();
        let lower_prefix = prefix.to_ascii_lowercase();
        let mut matches: Vec<&str> = names
            .iter()
            .filter(|name| name.to_ascii_lowercase().starts_with(&lower_prefix))
            .map(String::as_str)
            .collect();
        matches.sort_unstable();

        let repeated = self.last_tab_prefix.as_deref() == Some(prefix.as_str());

        match matches.len() {
            0 => {
                self.last_tab_prefix = None;
                Outcome::Bell
            }
            1 if !repeated || prefix != matches[0] => {
                let completed = format!("{} ", matches[0]);
                self.set_line(completed.clone());
                self.last_tab_prefix = None;
                Outcome::Complete(completed)
            }
            _ => {
                self.last_tab_prefix = Some(prefix);
                Outcome::CompleteList(matches.into_iter().map(str::to_string).collect())
            }
        }
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        LineEditor::new()
    }
}

/// Lay out `names` into a readable multi-column grid, the way TAB
/// completion listings and `help` render wide command lists.
pub fn format_grid(names: &[String], terminal_width: usize) -> String {
    if names.is_empty() {
        return String::new();
    }

    let col_width = names.iter().map(String::len).max().unwrap_or(0) + 2;
    let columns = (terminal_width / col_width).max(1);

    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        out.push_str(&format!("{:width$}", name, width = col_width));
        if (i + 1) % columns == 0 {
            out.push('\n');
        }
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Emit an audible bell.
pub fn bell() -> [u8; 1] {
    [BELL]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(decoder: &mut KeyDecoder, s: &str) -> Vec<Key> {
        s.bytes().filter_map(|b| decoder.feed(b)).collect()
    }

    #[test]
    fn decodes_printable_and_cr() {
        let mut decoder = KeyDecoder::new();
        let keys = feed_str(&mut decoder, "hi\r");
        assert_eq!(keys, vec![Key::Printable('h'), Key::Printable('i'), Key::Commit]);
    }

    #[test]
    fn decodes_arrow_keys() {
        let mut decoder = KeyDecoder::new();
        let mut keys = Vec::new();
        for b in [0x1b, b'[', b'A'] {
            if let Some(k) = decoder.feed(b) {
                keys.push(k);
            }
        }
        assert_eq!(keys, vec![Key::HistoryPrev]);
    }

    #[test]
    fn consumes_telnet_iac_sequence() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.feed(0xff), None);
        assert_eq!(decoder.feed(0xfb), None);
        assert_eq!(decoder.feed(0x01), None);
        // Fourth byte resumes normal parsing.
        assert_eq!(decoder.feed(b'x'), Some(Key::Printable('x')));
    }

    #[test]
    fn line_editing_roundtrip() {
        let mut editor = LineEditor::new();
        for c in "echo".chars() {
            editor.apply(Key::Printable(c));
        }
        editor.apply(Key::Left);
        editor.apply(Key::Left);
        editor.apply(Key::Backspace);
        assert_eq!(editor.line(), "eho");
    }

    #[test]
    fn history_roundtrip() {
        let mut editor = LineEditor::new();
        for c in "first".chars() {
            editor.apply(Key::Printable(c));
        }
        editor.apply(Key::Commit);
        for c in "second".chars() {
            editor.apply(Key::Printable(c));
        }
        editor.apply(Key::Commit);

        editor.apply(Key::HistoryPrev);
        assert_eq!(editor.line(), "second");
        editor.apply(Key::HistoryPrev);
        assert_eq!(editor.line(), "first");
        assert!(matches!(editor.apply(Key::HistoryPrev), Outcome::Bell));
        editor.apply(Key::HistoryNext);
        assert_eq!(editor.line(), "second");
    }

    #[test]
    fn tab_completion_single_match_autocompletes() {
        let mut editor = LineEditor::new();
        for c in "he".chars() {
            editor.apply(Key::Printable(c));
        }
        let names = vec!["help".to_string(), "quit".to_string()];
        match editor.complete(&names) {
            Outcome::Complete(line) => assert_eq!(line, "help "),
            _ => panic!("expected a single completion"),
        }
    }

    #[test]
    fn tab_completion_lists_ambiguous_matches() {
        let mut editor = LineEditor::new();
        let names = vec!["help".to_string(), "history".to_string()];
        for c in "h".chars() {
            editor.apply(Key::Printable(c));
        }
        match editor.complete(&names) {
            Outcome::CompleteList(matches) => assert_eq!(matches, vec!["help", "history"]),
            _ => panic!("expected an ambiguous match listing"),
        }
    }

    #[test]
    fn tab_completion_no_match_rings_bell() {
        let mut editor = LineEditor::new();
        for c in "zz".chars() {
            editor.apply(Key::Printable(c));
        }
        let names = vec!["help".to_string()];
        assert!(matches!(editor.complete(&names), Outcome::Bell));
    }

    #[test]
    fn line_length_is_capped() {
        let mut editor = LineEditor::new();
        for _ in 0..LINE_LENGTH_CAP {
            editor.apply(Key::Printable('a'));
        }
        assert!(matches!(editor.apply(Key::Printable('a')), Outcome::Bell));
    }
}
