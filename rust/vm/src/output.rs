//! The runner's output stream: text, tags, and line-break markers with
//! save/restore marks for speculative execution.

use serde::{Deserialize, Serialize};

/// One entry in the output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputEntry {
    /// Text fragment.
    Text(String),
    /// Tag attached at this position: tags before any text on a line
    /// belong to the whole line, later tags to the following text token.
    Tag(String),
    /// Line break.
    NewLine,
}

/// A completed line handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// Line text including the trailing newline.
    pub text: String,
    /// Tags associated with the line, in emission order.
    pub tags: Vec<String>,
}

/// Buffered, restorable output.
///
/// `save` marks the current length; `restore` truncates back to the mark
/// (discarding speculative output) and `forget` commits it. At most one
/// mark is active at a time, matching the strictly nested lookahead
/// discipline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStream {
    entries: Vec<OutputEntry>,
    mark: Option<usize>,
}

impl OutputStream {
    /// Create an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text fragment.
    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.entries.push(OutputEntry::Text(text));
        }
    }

    /// Append a tag.
    pub fn push_tag(&mut self, tag: impl Into<String>) {
        self.entries.push(OutputEntry::Tag(tag.into()));
    }

    /// Append a line break.
    pub fn push_newline(&mut self) {
        self.entries.push(OutputEntry::NewLine);
    }

    /// Glue: remove line breaks immediately behind the write position so
    /// the next text merges with the previous fragment.
    pub fn push_glue(&mut self) {
        while matches!(self.entries.last(), Some(OutputEntry::NewLine)) {
            self.entries.pop();
        }
    }

    /// Place the speculation mark at the current position.
    pub fn save(&mut self) {
        self.mark = Some(self.entries.len());
    }

    /// Discard everything written since `save`.
    pub fn restore(&mut self) {
        if let Some(mark) = self.mark.take() {
            self.entries.truncate(mark);
        }
    }

    /// Commit everything written since `save`.
    pub fn forget(&mut self) {
        self.mark = None;
    }

    /// Whether a complete line (terminated by a break) is buffered.
    #[must_use]
    pub fn has_line(&self) -> bool {
        self.entries.contains(&OutputEntry::NewLine)
    }

    /// Whether non-whitespace text was written at or after `pos`.
    #[must_use]
    pub fn new_text_since(&self, pos: usize) -> bool {
        self.entries[pos.min(self.entries.len())..]
            .iter()
            .any(|e| matches!(e, OutputEntry::Text(t) if !t.trim().is_empty()))
    }

    /// Current write position, used as the `save` anchor by callers that
    /// need to inspect speculative output.
    #[must_use]
    pub fn position(&self) -> usize {
        self.entries.len()
    }

    /// Pop the first buffered line, with its tags.
    pub fn take_line(&mut self) -> Option<Line> {
        let end = self
            .entries
            .iter()
            .position(|e| *e == OutputEntry::NewLine)?;
        let mut text = String::new();
        let mut tags = Vec::new();
        for entry in self.entries.drain(..=end) {
            match entry {
                OutputEntry::Text(t) => text.push_str(&t),
                OutputEntry::Tag(t) => tags.push(t),
                OutputEntry::NewLine => {}
            }
        }
        if let Some(mark) = self.mark.as_mut() {
            *mark = mark.saturating_sub(end + 1);
        }
        text.push('\n');
        Some(Line { text, tags })
    }

    /// Drain everything buffered as a final partial line (no trailing
    /// newline). Used when flow suspends with an unterminated fragment.
    pub fn take_partial(&mut self) -> Line {
        let mut text = String::new();
        let mut tags = Vec::new();
        for entry in self.entries.drain(..) {
            match entry {
                OutputEntry::Text(t) => text.push_str(&t),
                OutputEntry::Tag(t) => tags.push(t),
                OutputEntry::NewLine => {}
            }
        }
        self.mark = None;
        Line { text, tags }
    }

    /// Raw entries (snapshot support and tests).
    #[must_use]
    pub fn entries(&self) -> &[OutputEntry] {
        &self.entries
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
