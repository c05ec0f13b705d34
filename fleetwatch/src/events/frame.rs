const DATA_FIELD: &str = "data:";
const COMMENT_PREFIX: char = ':';

/// Accumulates Server-Sent Events lines into record payloads. `data:` lines join with newlines,
/// a blank line ends the record, and `:` lines are keepalive comments. Other fields are ignored.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SseDecoder {
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a completed record payload when the line ends a record.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.is_empty() {
            return self.flush();
        }

        if line.starts_with(COMMENT_PREFIX) {
            return None;
        }

        if let Some(data) = line.strip_prefix(DATA_FIELD) {
            self.data_lines.push(data.trim().to_string());
        }

        None
    }

    /// Flush any record left pending when the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        self.flush()
    }

    pub fn has_pending(&self) -> bool {
        !self.data_lines.is_empty()
    }

    fn flush(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }

        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(payload)
    }
}
