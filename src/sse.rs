//! Incremental parser for the line-oriented `event:`/`data:` stream protocol.
//!
//! Transport-agnostic: bytes are pushed in via [`SseParser::feed`] in whatever
//! chunks the network delivers, and complete events come back out. A carry-over
//! buffer makes the parser correct when protocol lines are split at arbitrary
//! byte offsets. The caller pulls events at its own pace, so backpressure and
//! cancellation stay with the surrounding stream.

/// One parsed protocol event: optional event name plus newline-joined data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end().to_string();
            self.buffer.drain(..=pos);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush at end of stream: a final unterminated line and any pending
    /// event are emitted even without a trailing blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(event) = self.process_line(line.trim_end()) {
                return Some(event);
            }
        }
        self.flush_pending()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.flush_pending();
        }

        if let Some(rest) = line.strip_prefix("event:") {
            self.pending_event = Some(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.pending_data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // Comments and unknown field names are ignored.
        None
    }

    fn flush_pending(&mut self) -> Option<SseEvent> {
        if self.pending_event.is_none() && self.pending_data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self.pending_event.take(),
            data: std::mem::take(&mut self.pending_data).join("\n"),
        })
    }
}
