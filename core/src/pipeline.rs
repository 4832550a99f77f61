//! Line assembly and event extraction for decoded terminal output.

use std::sync::Arc;

use serde_json::Value;

use crate::event_log::DomainEvent;
use crate::event_log::EventLog;
use crate::parser::LineParser;
use crate::parser::ScalarTracker;

/// A partial line longer than this is processed as if it had ended, so a
/// program that never prints a newline cannot grow the buffer without bound.
pub const MAX_PENDING_LINE_BYTES: usize = 64 * 1024;

pub struct LinePipeline {
    source: String,
    scalar_key: String,
    parser: Arc<dyn LineParser>,
    tracker: ScalarTracker,
    events: Arc<EventLog>,
    pending: String,
}

impl LinePipeline {
    pub fn new(
        source: impl Into<String>,
        scalar_key: impl Into<String>,
        parser: Arc<dyn LineParser>,
        tracker: ScalarTracker,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            source: source.into(),
            scalar_key: scalar_key.into(),
            parser,
            tracker,
            events,
            pending: String::new(),
        }
    }

    pub fn scalar(&self) -> i64 {
        self.tracker.current()
    }

    /// Text received after the last newline.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Feeds decoded output. Every complete line is handled even when an
    /// earlier one failed to persist; the first such error is returned.
    /// Returns the number of events written.
    pub fn push_text(&mut self, text: &str) -> std::io::Result<usize> {
        self.pending.push_str(text);

        let mut written = 0;
        let mut first_error = None;
        while let Some(newline) = self.pending.find('\n') {
            let rest = self.pending.split_off(newline + 1);
            let line = std::mem::replace(&mut self.pending, rest);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            match self.handle_line(line) {
                Ok(count) => written += count,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if self.pending.len() > MAX_PENDING_LINE_BYTES {
            let line = std::mem::take(&mut self.pending);
            match self.handle_line(&line) {
                Ok(count) => written += count,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    /// Updates the scalar from `line`, then appends every event the parser
    /// extracts. Empty lines are ignored entirely.
    pub fn handle_line(&mut self, line: &str) -> std::io::Result<usize> {
        if line.is_empty() {
            return Ok(0);
        }
        let scalar = self.tracker.observe(line);
        let parsed = self.parser.parse_line(line, scalar);
        let count = parsed.len();
        for event in parsed {
            let mut payload = event.payload;
            payload
                .entry(self.scalar_key.clone())
                .or_insert(Value::from(scalar));
            tracing::debug!(event_type = %event.event_type, "extracted event");
            self.events
                .append(&DomainEvent::new(&self.source, event.event_type, payload))?;
        }
        Ok(count)
    }
}

impl std::fmt::Debug for LinePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinePipeline")
            .field("source", &self.source)
            .field("parser", &self.parser)
            .field("scalar", &self.tracker.current())
            .field("pending_bytes", &self.pending.len())
            .finish_non_exhaustive()
    }
}
