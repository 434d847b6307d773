//! Line reconstruction across arbitrary write boundaries.

/// Accumulates text for one classification and splits off completed lines.
///
/// A line is complete once a `\n` arrives; a `\r` immediately before it is
/// part of the terminator. Whatever follows the last terminator stays
/// buffered until more text arrives or the framer is drained.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: String,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and return every line it completed, in order.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let Some(last) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete
            .split_terminator('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

    /// Take the unterminated remainder, if there is any.
    ///
    /// A trailing `\r` is dropped; the stream ended where its `\n` would
    /// have been.
    pub fn take_rest(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut rest = std::mem::take(&mut self.buffer);
        if rest.ends_with('\r') {
            rest.pop();
        }
        Some(rest)
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard anything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
