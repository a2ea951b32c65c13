//! Byte accumulator that turns the server's unframed output into lines.
//!
//! The server writes `\r\n`-terminated lines on Windows and `\n` on Linux, so a
//! line ends at the first `\n` and a trailing `\r` is dropped. Partial lines stay
//! buffered until their terminator arrives.

/// Append-only buffer of raw process output.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk exactly as it was read from the pipe.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// `true` if at least one complete line is buffered.
    pub fn has_line(&self) -> bool {
        self.buf.contains(&b'\n')
    }

    /// `true` if any bytes (complete or partial) are buffered.
    pub fn has_data(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Remove and return the first complete line without its delimiter.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the server's console
    /// output is not guaranteed to be clean.
    pub fn next_line(&mut self) -> Option<String> {
        let idx = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Return whatever partial line is left, e.g. after the process exits.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// Strip a leading `[<timestamp> <LEVEL>] ` prefix if the line has one.
///
/// Only used for keyword matching; callers still display the raw line.
pub fn strip_log_prefix(line: &str) -> &str {
    const LEVELS: [&str; 5] = ["INFO", "WARN", "ERROR", "DEBUG", "VERBOSE"];

    let Some(rest) = line.strip_prefix('[') else {
        return line;
    };
    let Some(close) = rest.find(']') else {
        return line;
    };
    let header = &rest[..close];
    let is_level = header
        .rsplit(' ')
        .next()
        .map(|level| LEVELS.contains(&level))
        .unwrap_or(false);
    if !is_level {
        return line;
    }
    let body = &rest[close + 1..];
    body.strip_prefix(' ').unwrap_or(body)
}
