//! CSV output format for call traces
//!
//! Two layouts:
//! - events: one row per call and per return, prefixed by the event name
//! - edges: one row per call with its caller (flattened mode)
//!
//! String columns are always quoted with embedded quotes doubled. Rows are
//! formatted into a buffer owned by the writer and reused for every event.

use std::fmt::Write as _;

use crate::event::{TraceEvent, UNKNOWN};
use crate::stack::StackFrame;

/// Header for event-by-event output
pub const EVENT_HEADER: &str = "event,entity,method_name,method_level,filepath,lineno\n";

/// Header for flattened caller-inclusive output
pub const EDGE_HEADER: &str =
    "entity,method_name,method_level,filepath,lineno,caller_entity,caller_method_name,caller_method_level\n";

/// Prefix of a session-boundary line
pub const MARK_PREFIX: &str = "--- ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// Every call and return, no caller columns
    Events,
    /// Deduplicated call edges with caller columns
    Edges,
}

impl RecordFormat {
    pub fn header(self) -> &'static str {
        match self {
            RecordFormat::Events => EVENT_HEADER,
            RecordFormat::Edges => EDGE_HEADER,
        }
    }
}

/// CSV row formatter with a reusable buffer
#[derive(Debug)]
pub struct CsvRecordWriter {
    format: RecordFormat,
    buf: String,
}

impl CsvRecordWriter {
    /// Create a new CSV row formatter
    pub fn new(format: RecordFormat) -> Self {
        Self {
            format,
            buf: String::with_capacity(256),
        }
    }

    pub fn format(&self) -> RecordFormat {
        self.format
    }

    pub fn header(&self) -> &'static str {
        self.format.header()
    }

    /// Append `field` quoted, doubling embedded quotes
    fn push_quoted(buf: &mut String, field: &str) {
        buf.push('"');
        if field.contains('"') {
            for c in field.chars() {
                if c == '"' {
                    buf.push('"');
                }
                buf.push(c);
            }
        } else {
            buf.push_str(field);
        }
        buf.push('"');
    }

    fn push_callee(buf: &mut String, event: &TraceEvent) {
        Self::push_quoted(buf, &event.entity);
        buf.push(',');
        Self::push_quoted(buf, &event.method_name);
        buf.push(',');
        buf.push_str(event.method_kind.as_str());
        buf.push(',');
        Self::push_quoted(buf, &event.filepath);
        buf.push(',');
        let _ = write!(buf, "{}", event.lineno);
    }

    /// Format `event` as an events-layout row
    pub fn format_event(&mut self, event: &TraceEvent) -> &str {
        self.buf.clear();
        self.buf.push_str(event.kind.as_str());
        self.buf.push(',');
        Self::push_callee(&mut self.buf, event);
        self.buf.push('\n');
        &self.buf
    }

    /// Format a call edge as an edges-layout row
    pub fn format_edge(&mut self, callee: &TraceEvent, caller: &StackFrame) -> &str {
        self.buf.clear();
        Self::push_callee(&mut self.buf, callee);
        self.buf.push(',');
        Self::push_quoted(&mut self.buf, &caller.trace.entity);
        self.buf.push(',');
        Self::push_quoted(&mut self.buf, &caller.trace.method_name);
        self.buf.push(',');
        if caller.is_root() {
            self.buf.push_str(UNKNOWN);
        } else {
            self.buf.push_str(caller.trace.method_kind.as_str());
        }
        self.buf.push('\n');
        &self.buf
    }

    /// Format a session-boundary line
    pub fn format_mark(&mut self, label: &str) -> &str {
        self.buf.clear();
        self.buf.push_str(MARK_PREFIX);
        self.buf.push_str(label);
        self.buf.push('\n');
        &self.buf
    }
}
