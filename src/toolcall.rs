//! Streaming tool-call validator (C7b): validates an LLM's tool-call
//! object character-by-character, rejecting unknown tools and invalid
//! fields before the full call has streamed in.
//!
//! Built on the same bracket/quote bookkeeping as [`crate::stream`], but
//! deliberately not layered on top of it: early rejection needs to act the
//! instant `action`/`tool` resolves, not after `StreamParser`'s token
//! boundary is found, so this module drives its own character scanner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::GlyphError;
use crate::schema::Constraint;
use crate::types::{field, GValue, StructValue};

/// One parameter of a tool's call shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFieldSpec {
    pub name: String,
    pub required: bool,
    pub constraints: Vec<Constraint>,
}

impl ToolFieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            constraints: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn constrain(mut self, c: Constraint) -> Self {
        self.constraints.push(c);
        self
    }
}

/// A registered tool's call shape: its name plus its declared fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub fields: Vec<ToolFieldSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, f: ToolFieldSpec) -> Self {
        self.fields.push(f);
        self
    }

    pub fn field_by_name(&self, name: &str) -> Option<&ToolFieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Read-mostly tool registry shared across concurrent validators. Reads
/// (the common case — one lookup per tool call) take a shared lock;
/// registration takes an exclusive one.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolSpec>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: ToolSpec) {
        self.tools.write().insert(spec.name.clone(), Arc::new(spec));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }
}

/// `Waiting → InObject → Complete | Error`, per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorState {
    Waiting,
    InObject,
    Complete,
    Error,
}

/// Token index and elapsed time captured at each named milestone.
#[derive(Debug, Clone, Default)]
pub struct ToolCallTiming {
    pub tool_detected_at: Option<(usize, Duration)>,
    pub first_error_at: Option<(usize, Duration)>,
    pub object_complete_at: Option<(usize, Duration)>,
}

/// Streaming, character-at-a-time tool-call validator.
///
/// Not `Send`-shared: one validator per stream, per spec's thread-safety
/// note ("validators are not shared between concurrent streams").
pub struct ToolCallValidator {
    registry: Arc<ToolRegistry>,
    state: ValidatorState,
    started: Instant,
    char_index: usize,
    key_buf: String,
    value_buf: String,
    reading_key: bool,
    in_quotes: bool,
    escape: bool,
    value_depth: u32,
    tool: Option<Arc<ToolSpec>>,
    seen: Vec<(String, GValue)>,
    error: Option<GlyphError>,
    timing: ToolCallTiming,
}

impl ToolCallValidator {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            state: ValidatorState::Waiting,
            started: Instant::now(),
            char_index: 0,
            key_buf: String::new(),
            value_buf: String::new(),
            reading_key: true,
            in_quotes: false,
            escape: false,
            value_depth: 0,
            tool: None,
            seen: Vec::new(),
            error: None,
            timing: ToolCallTiming::default(),
        }
    }

    pub fn state(&self) -> ValidatorState {
        self.state
    }

    pub fn error(&self) -> Option<&GlyphError> {
        self.error.as_ref()
    }

    pub fn timing(&self) -> &ToolCallTiming {
        &self.timing
    }

    /// Detected tool name, once `action`/`tool` has resolved (even if a
    /// later field then fails validation).
    pub fn tool_name(&self) -> Option<&str> {
        self.tool.as_ref().map(|t| t.name.as_str())
    }

    /// True once the caller should stop feeding the stream: a terminal
    /// error (stop immediately, the call is rejected) or a completed,
    /// valid object (stop, there's nothing left to validate). A query,
    /// not a signal — the caller decides what to do with it.
    pub fn should_stop(&self) -> bool {
        matches!(self.state, ValidatorState::Error | ValidatorState::Complete)
    }

    /// Once `Complete`, the validated call as a struct value tagged with
    /// the tool name.
    pub fn result(&self) -> Option<StructValue> {
        if self.state != ValidatorState::Complete {
            return None;
        }
        let name = self.tool_name()?.to_string();
        let fields = self.seen.iter().map(|(k, v)| field(k.clone(), v.clone())).collect();
        Some(StructValue::new(name, fields))
    }

    /// Feed a chunk of text. Returns once the chunk is exhausted or
    /// `should_stop()` becomes true, whichever comes first.
    pub fn feed(&mut self, text: &str) {
        for c in text.chars() {
            if self.should_stop() {
                return;
            }
            self.feed_char(c);
        }
    }

    fn feed_char(&mut self, c: char) {
        self.char_index += 1;
        match self.state {
            ValidatorState::Waiting => {
                if c == '{' {
                    self.state = ValidatorState::InObject;
                    self.reading_key = true;
                }
                // Leading whitespace or stray tokens before the object
                // opens are ignored; nothing to validate yet.
            }
            ValidatorState::InObject => self.consume_in_object(c),
            ValidatorState::Complete | ValidatorState::Error => {}
        }
    }

    fn consume_in_object(&mut self, c: char) {
        if self.reading_key {
            match c {
                '}' if self.key_buf.trim().is_empty() => self.finish_object(),
                '=' | ':' => {
                    self.reading_key = false;
                    self.value_buf.clear();
                    self.in_quotes = false;
                    self.escape = false;
                    self.value_depth = 0;
                }
                ' ' | '\n' | '\t' | ',' | '"' if self.key_buf.is_empty() => {}
                _ => self.key_buf.push(c),
            }
            return;
        }

        if self.in_quotes {
            self.value_buf.push(c);
            if self.escape {
                self.escape = false;
            } else if c == '\\' {
                self.escape = true;
            } else if c == '"' {
                self.in_quotes = false;
            }
            return;
        }

        match c {
            '"' if self.value_buf.is_empty() => {
                self.in_quotes = true;
                self.value_buf.push(c);
            }
            '{' | '[' => {
                self.value_depth += 1;
                self.value_buf.push(c);
            }
            '}' | ']' if self.value_depth > 0 => {
                self.value_depth -= 1;
                self.value_buf.push(c);
            }
            '}' if self.value_depth == 0 => {
                self.complete_field();
                if self.state == ValidatorState::InObject {
                    self.finish_object();
                }
            }
            ' ' | '\n' | '\t' | ',' if self.value_depth == 0 => self.complete_field(),
            _ => self.value_buf.push(c),
        }
    }

    /// A field's value token has just ended. Parse it, dispatch on
    /// `action`/`tool`, and check per-field constraints for any later
    /// field once a tool has been resolved.
    fn complete_field(&mut self) {
        if self.key_buf.trim().is_empty() {
            self.value_buf.clear();
            return;
        }
        let key = std::mem::take(&mut self.key_buf).trim().to_string();
        let raw_value = std::mem::take(&mut self.value_buf);
        self.reading_key = true;

        let value = match crate::parser::parse(raw_value.trim()) {
            Ok(v) => v,
            Err(e) => {
                self.raise_error(GlyphError::BadToken {
                    path: key,
                    message: e.to_string(),
                });
                return;
            }
        };

        if self.tool.is_none() && (key == "action" || key == "tool") {
            let name = value.as_str().unwrap_or_default().to_string();
            self.timing.tool_detected_at = Some((self.char_index, self.started.elapsed()));
            match self.registry.get(&name) {
                Some(spec) => {
                    tracing::trace!(tool = %name, "tool-call validator resolved tool");
                    self.tool = Some(spec);
                }
                None => {
                    tracing::warn!(tool = %name, "tool-call validator: unknown tool");
                    self.raise_error(GlyphError::UnknownTool(name));
                    return;
                }
            }
        } else if let Some(tool) = self.tool.clone() {
            if let Some(f) = tool.field_by_name(&key) {
                for c in &f.constraints {
                    if matches!(c, Constraint::Unique) {
                        let elements: Vec<&GValue> = match &value {
                            GValue::List(items) => items.iter().collect(),
                            other => vec![other],
                        };
                        let mut seen: Vec<&GValue> = Vec::with_capacity(elements.len());
                        for elem in elements {
                            if let Err(msg) = c.check(elem, &seen) {
                                self.raise_error(GlyphError::ConstraintViolation {
                                    path: key,
                                    constraint: msg,
                                });
                                return;
                            }
                            seen.push(elem);
                        }
                    } else if let Err(msg) = c.check(&value, &[]) {
                        self.raise_error(GlyphError::ConstraintViolation { path: key, constraint: msg });
                        return;
                    }
                }
            }
        }

        self.seen.push((key, value));
    }

    fn finish_object(&mut self) {
        if let Some(tool) = self.tool.clone() {
            for f in &tool.fields {
                if f.required && !self.seen.iter().any(|(k, _)| k == &f.name) {
                    self.raise_error(GlyphError::RequiredFieldMissing { path: f.name.clone() });
                    return;
                }
            }
        }
        self.state = ValidatorState::Complete;
        self.timing.object_complete_at = Some((self.char_index, self.started.elapsed()));
    }

    fn raise_error(&mut self, err: GlyphError) {
        if self.timing.first_error_at.is_none() {
            self.timing.first_error_at = Some((self.char_index, self.started.elapsed()));
        }
        self.error = Some(err);
        self.state = ValidatorState::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<ToolRegistry> {
        let reg = ToolRegistry::new();
        reg.register(
            ToolSpec::new("search")
                .field(ToolFieldSpec::new("query").required().constrain(Constraint::MinLen(1))),
        );
        reg.register(ToolSpec::new("calculate").field(ToolFieldSpec::new("expr").required()));
        Arc::new(reg)
    }

    #[test]
    fn accepts_known_tool_and_completes() {
        let mut v = ToolCallValidator::new(registry());
        v.feed(r#"{action=search query="rust async"}"#);
        assert_eq!(v.state(), ValidatorState::Complete);
        let result = v.result().unwrap();
        assert_eq!(result.type_name, "search");
        assert_eq!(result.get("query"), Some(&GValue::str("rust async")));
    }

    #[test]
    fn rejects_unknown_tool_before_remaining_fields_are_read() {
        // S5: registry has {search, calculate}; `delete_all` must be
        // rejected as soon as `action` resolves, before `query` streams.
        let mut v = ToolCallValidator::new(registry());
        v.feed("{action=delete_all ");
        assert_eq!(v.state(), ValidatorState::Error);
        assert!(matches!(v.error(), Some(GlyphError::UnknownTool(_))));
        assert!(v.should_stop());

        // Feeding the rest changes nothing: the validator already latched.
        v.feed(r#"query="drop everything"}"#);
        assert!(matches!(v.error(), Some(GlyphError::UnknownTool(_))));
    }

    #[test]
    fn missing_required_field_errors_at_object_close() {
        let mut v = ToolCallValidator::new(registry());
        v.feed("{action=search}");
        assert_eq!(v.state(), ValidatorState::Error);
        assert!(matches!(v.error(), Some(GlyphError::RequiredFieldMissing { .. })));
    }

    #[test]
    fn constraint_violation_is_caught_on_field_completion() {
        let mut v = ToolCallValidator::new(registry());
        v.feed(r#"{action=search query=""}"#);
        assert_eq!(v.state(), ValidatorState::Error);
        assert!(matches!(v.error(), Some(GlyphError::ConstraintViolation { .. })));
    }

    #[test]
    fn timing_records_tool_detection_before_object_complete() {
        let mut v = ToolCallValidator::new(registry());
        v.feed(r#"{action=calculate expr="1+1"}"#);
        let t = v.timing();
        let (detect_idx, _) = t.tool_detected_at.unwrap();
        let (complete_idx, _) = t.object_complete_at.unwrap();
        assert!(detect_idx < complete_idx);
    }

    #[test]
    fn split_feed_matches_whole_feed() {
        let whole = {
            let mut v = ToolCallValidator::new(registry());
            v.feed(r#"{action=search query="a"}"#);
            (v.state(), v.result())
        };
        let split = {
            let mut v = ToolCallValidator::new(registry());
            v.feed("{action=sea");
            v.feed(r#"rch query="a"}"#);
            (v.state(), v.result())
        };
        assert_eq!(whole.0, split.0);
        assert_eq!(whole.1.map(|s| s.fields), split.1.map(|s| s.fields));
    }
}

#[cfg(test)]
mod tracing_tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct BufWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for BufWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufWriter {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let reg = ToolRegistry::new();
        reg.register(ToolSpec::new("search").field(ToolFieldSpec::new("query").required()));
        Arc::new(reg)
    }

    #[test]
    fn unknown_tool_rejection_emits_warn_event() {
        let buf = BufWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buf.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut v = ToolCallValidator::new(registry());
        v.feed("{action=delete_all ");
        assert_eq!(v.state(), ValidatorState::Error);

        let captured = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(captured.contains("unknown tool"), "captured: {captured}");
        assert!(captured.contains("delete_all"), "captured: {captured}");
    }

    #[test]
    fn known_tool_resolution_emits_trace_event() {
        let buf = BufWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buf.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut v = ToolCallValidator::new(registry());
        v.feed(r#"{action=search query="x"}"#);

        let captured = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(captured.contains("resolved tool"), "captured: {captured}");
        assert!(captured.contains("search"), "captured: {captured}");
    }
}
