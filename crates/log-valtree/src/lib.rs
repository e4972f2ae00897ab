//! Incremental JSON value-tree parser.
//!
//! [`StreamParser`] accepts byte chunks of arbitrary size — including ones
//! that split a string, escape sequence, or bracket mid-way — and emits
//! structured events to a [`Visitor`] once a complete top-level JSON object
//! has accumulated. Chunk-boundary tracking (string/escape/depth state) is
//! hand-rolled and persists across `feed` calls; once a value is complete,
//! its (self-contained, in-memory) bytes are handed to `serde_json` for the
//! actual decode, and the resulting tree is walked into visitor calls. This
//! avoids reinventing JSON's full grammar by hand while still never
//! requiring a whole message to arrive in a single read.

use std::collections::VecDeque;

/// The flat event contract between the parser and whatever reassembles
/// structured records from it (a sink adapter, typically). Every method
/// returns "should continue": `false` aborts the walk early.
pub trait Visitor {
    fn begin(&mut self) -> bool {
        true
    }
    fn finish(&mut self) -> bool {
        true
    }
    fn failed(&mut self) {}

    fn begin_struct(&mut self) -> bool {
        true
    }
    fn finish_struct(&mut self) -> bool {
        true
    }
    fn begin_list(&mut self) -> bool {
        true
    }
    fn finish_list(&mut self) -> bool {
        true
    }
    fn begin_attribute(&mut self, _name: &str) -> bool {
        true
    }
    fn finish_attribute(&mut self, _name: &str) -> bool {
        true
    }

    fn consume_bool(&mut self, _v: bool) -> bool {
        true
    }
    fn consume_i64(&mut self, _v: i64) -> bool {
        true
    }
    fn consume_u64(&mut self, _v: u64) -> bool {
        true
    }
    fn consume_f64(&mut self, _v: f64) -> bool {
        true
    }
    fn consume_str(&mut self, _v: &str) -> bool {
        true
    }
    fn consume_null(&mut self) -> bool {
        true
    }

    /// Out-of-band bytes outside the JSON value stream (unused by the
    /// object-per-line framing `StreamParser` implements today, but part of
    /// the contract so other framings can reuse the same visitor).
    fn unparsed_data(&mut self, _data: &[u8]) -> bool {
        true
    }
}

/// Forwards every call to `first`, then to `second`, in order. Stops
/// forwarding to `second` (and reports `false`) as soon as either visitor
/// reports `should_continue == false`.
pub struct CombinedVisitor<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> CombinedVisitor<A, B> {
    pub fn new(first: A, second: B) -> Self {
        CombinedVisitor { first, second }
    }
}

macro_rules! forward_bool {
    ($name:ident) => {
        fn $name(&mut self) -> bool {
            self.first.$name() && self.second.$name()
        }
    };
    ($name:ident, $arg_ty:ty) => {
        fn $name(&mut self, v: $arg_ty) -> bool {
            self.first.$name(v) && self.second.$name(v)
        }
    };
}

impl<A: Visitor, B: Visitor> Visitor for CombinedVisitor<A, B> {
    forward_bool!(begin);
    forward_bool!(finish);

    fn failed(&mut self) {
        self.first.failed();
        self.second.failed();
    }

    forward_bool!(begin_struct);
    forward_bool!(finish_struct);
    forward_bool!(begin_list);
    forward_bool!(finish_list);

    fn begin_attribute(&mut self, name: &str) -> bool {
        self.first.begin_attribute(name) && self.second.begin_attribute(name)
    }
    fn finish_attribute(&mut self, name: &str) -> bool {
        self.first.finish_attribute(name) && self.second.finish_attribute(name)
    }

    forward_bool!(consume_bool, bool);
    forward_bool!(consume_i64, i64);
    forward_bool!(consume_u64, u64);
    forward_bool!(consume_f64, f64);

    fn consume_str(&mut self, v: &str) -> bool {
        self.first.consume_str(v) && self.second.consume_str(v)
    }
    forward_bool!(consume_null);

    fn unparsed_data(&mut self, data: &[u8]) -> bool {
        self.first.unparsed_data(data) && self.second.unparsed_data(data)
    }
}

#[derive(Debug)]
pub enum ParseError {
    /// A single token (string/number/object/array) grew past the configured
    /// limit before it closed.
    TokenTooLarge { limit: usize },
    /// Malformed framing: an unmatched closing bracket, or similar.
    Malformed(String),
    /// The buffered bytes did not decode as JSON once a value appeared complete.
    Invalid(serde_json::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::TokenTooLarge { limit } => {
                write!(f, "token exceeded max size of {limit} bytes")
            }
            ParseError::Malformed(msg) => write!(f, "malformed input: {msg}"),
            ParseError::Invalid(e) => write!(f, "invalid json: {e}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

pub struct ParserBuilder {
    max_token_size: usize,
}

impl ParserBuilder {
    pub fn new() -> Self {
        ParserBuilder {
            max_token_size: 1 << 20,
        }
    }

    pub fn max_token_size(mut self, bytes: usize) -> Self {
        self.max_token_size = bytes;
        self
    }

    pub fn build(self) -> StreamParser {
        StreamParser {
            buf: VecDeque::new(),
            max_token_size: self.max_token_size,
            depth: 0,
            in_string: false,
            escape: false,
            started: false,
            value_start: 0,
            failed: false,
        }
    }
}

impl Default for ParserBuilder {
    fn default() -> Self {
        ParserBuilder::new()
    }
}

/// Incremental, chunk-boundary-safe JSON object tokenizer.
///
/// Each top-level value is expected to be a JSON object (the wire framing
/// used throughout this pipeline: one `{...}` per event record, newline- or
/// object-delimited). Whitespace between objects is skipped.
pub struct StreamParser {
    buf: VecDeque<u8>,
    max_token_size: usize,
    depth: usize,
    in_string: bool,
    escape: bool,
    started: bool,
    value_start: usize,
    failed: bool,
}

impl StreamParser {
    pub fn builder() -> ParserBuilder {
        ParserBuilder::new()
    }

    /// Feed a chunk of bytes; emits zero or more complete top-level objects
    /// to `visitor`. Safe to call with any split of the input, including
    /// mid-string or mid-number.
    pub fn feed(&mut self, chunk: &[u8], visitor: &mut dyn Visitor) -> Result<(), ParseError> {
        if self.failed {
            return Err(ParseError::Malformed("parser already failed".into()));
        }
        self.buf.extend(chunk.iter().copied());

        loop {
            match self.scan_one(visitor) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    visitor.failed();
                    self.failed = true;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Scans as far as possible into the buffered bytes. Returns `Ok(true)`
    /// if a complete top-level value was found and dispatched (the caller
    /// should try again — more values may be buffered), `Ok(false)` if more
    /// input is needed.
    fn scan_one(&mut self, visitor: &mut dyn Visitor) -> Result<bool, ParseError> {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        let mut i = 0usize;

        if !self.started {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                drain_front(&mut self.buf, i);
                return Ok(false);
            }
            if bytes[i] != b'{' {
                return Err(ParseError::Malformed(format!(
                    "expected '{{' at top level, found {:?}",
                    bytes[i] as char
                )));
            }
            self.started = true;
            self.value_start = i;
        }

        while i < bytes.len() {
            let b = bytes[i];
            if i - self.value_start + 1 > self.max_token_size {
                return Err(ParseError::TokenTooLarge {
                    limit: self.max_token_size,
                });
            }
            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if b == b'\\' {
                    self.escape = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
            } else {
                match b {
                    b'"' => self.in_string = true,
                    b'{' | b'[' => self.depth += 1,
                    b'}' | b']' => {
                        if self.depth == 0 {
                            return Err(ParseError::Malformed("unbalanced closing bracket".into()));
                        }
                        self.depth -= 1;
                    }
                    _ => {}
                }
            }

            if self.depth == 0 && self.started && i >= self.value_start {
                // closing brace of the top-level object just consumed
                if bytes[i] == b'}' {
                    let slice = &bytes[self.value_start..=i];
                    self.dispatch(slice, visitor)?;
                    drain_front(&mut self.buf, i + 1);
                    self.started = false;
                    self.value_start = 0;
                    return Ok(true);
                }
            }
            i += 1;
        }

        Ok(false)
    }

    fn dispatch(&self, slice: &[u8], visitor: &mut dyn Visitor) -> Result<(), ParseError> {
        let value: serde_json::Value = serde_json::from_slice(slice).map_err(ParseError::Invalid)?;
        if !visitor.begin() {
            return Ok(());
        }
        if walk(&value, visitor) {
            visitor.finish();
        }
        Ok(())
    }
}

fn drain_front(buf: &mut VecDeque<u8>, n: usize) {
    for _ in 0..n {
        buf.pop_front();
    }
}

fn walk(value: &serde_json::Value, visitor: &mut dyn Visitor) -> bool {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            if !visitor.begin_struct() {
                return false;
            }
            for (k, v) in map {
                if !visitor.begin_attribute(k) {
                    return false;
                }
                if !walk(v, visitor) {
                    return false;
                }
                if !visitor.finish_attribute(k) {
                    return false;
                }
            }
            visitor.finish_struct()
        }
        Value::Array(items) => {
            if !visitor.begin_list() {
                return false;
            }
            for v in items {
                if !walk(v, visitor) {
                    return false;
                }
            }
            visitor.finish_list()
        }
        Value::String(s) => visitor.consume_str(s),
        Value::Bool(b) => visitor.consume_bool(*b),
        Value::Null => visitor.consume_null(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                visitor.consume_i64(i)
            } else if let Some(u) = n.as_u64() {
                visitor.consume_u64(u)
            } else {
                visitor.consume_f64(n.as_f64().unwrap_or(0.0))
            }
        }
    }
}
