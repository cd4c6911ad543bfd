//! Tap sources
//!
//! The NFC reader lives outside this crate. Anything that can yield
//! `TapRead`s drives the handler; the line adapter turns
//! `<uid> [token_id]` text into reads.

use std::io::{self, BufRead};

/// One physical tap as reported by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapRead {
    pub uid: String,
    /// Token id stored on the tag, if it has been registered
    pub token_id: Option<String>,
}

impl TapRead {
    pub fn new(uid: impl Into<String>, token_id: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            token_id,
        }
    }
}

/// Blocking source of taps. `Ok(None)` means the source is exhausted.
pub trait TapSource: Send {
    fn next_tap(&mut self) -> io::Result<Option<TapRead>>;
}

/// Reads `<uid> [token_id]` lines; blank lines and `#` comments are skipped.
pub struct LineTapSource<R> {
    reader: R,
    line: String,
}

impl<R: BufRead + Send> LineTapSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

impl LineTapSource<io::BufReader<io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(io::BufReader::new(io::stdin()))
    }
}

impl<R: BufRead + Send> TapSource for LineTapSource<R> {
    fn next_tap(&mut self) -> io::Result<Option<TapRead>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            if let Some(read) = parse_line(&self.line) {
                return Ok(Some(read));
            }
        }
    }
}

fn parse_line(line: &str) -> Option<TapRead> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split_whitespace();
    let uid = parts.next()?;
    Some(TapRead::new(uid, parts.next().map(str::to_string)))
}
