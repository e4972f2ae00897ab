//! Wire-format adapter: reassembles typed event records from the flat
//! visitor stream `log_valtree::StreamParser` emits, then hands them to a
//! stream's sink.
//!
//! [`WireAdapter`] rebuilds a `serde_json::Value` by tracking a stack of
//! in-progress objects/arrays (the adapter reassembles event records from
//! the flat event stream using a current-path stack), then deserializes
//! the completed top-level object into a [`WireEvent`] once the parser
//! reports the value is done.

use log_ident::Identifier;
use log_model::{
    ActiveState, ArgValue, Begin, DeclareState, Description, Finish, Heartbeat, Interval, Message,
    Severity,
};
use log_sink::{Incoming, SinkState, StreamSink};
use log_valtree::Visitor;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::warn;

#[derive(Deserialize)]
struct WireArg {
    name: String,
    tag: String,
    value: Value,
    #[serde(default)]
    min: Option<f32>,
    #[serde(default)]
    max: Option<f32>,
}

/// Infers an `ArgValue` purely from the JSON value's own shape, ignoring
/// any type-tag hint. Used both for unrecognized tags and as the fallback
/// when a recognized tag disagrees with the value it was sent with (e.g. a
/// `bool`-tagged argument sent as the literal integer `1`) — the tag is a
/// hint, not a license to silently coerce the value to a default.
fn arg_value_from_shape(value: &Value) -> ArgValue {
    match value {
        Value::Bool(b) => ArgValue::Bool(*b),
        Value::String(s) => ArgValue::String(s.clone()),
        Value::Number(n) if n.is_i64() => ArgValue::I64(n.as_i64().unwrap()),
        Value::Number(n) if n.is_u64() => ArgValue::U64(n.as_u64().unwrap()),
        other => ArgValue::F32(other.as_f64().unwrap_or_default() as f32),
    }
}

fn arg_value_from_wire(tag: &str, value: &Value) -> ArgValue {
    match tag {
        "bool" => match value.as_bool() {
            Some(b) => ArgValue::Bool(b),
            // a bool-tagged argument sent as an integral (e.g. `1`): keep
            // the integral so `Arg::as_bool`'s 0/1 coercion still applies.
            None => arg_value_from_shape(value),
        },
        "i64" | "int" => ArgValue::I64(value.as_i64().unwrap_or_default()),
        "u64" | "uint" => ArgValue::U64(value.as_u64().unwrap_or_default()),
        "f32" | "float" => ArgValue::F32(value.as_f64().unwrap_or_default() as f32),
        "duration" | "dur" => {
            ArgValue::Duration(Duration::from_secs_f64(value.as_f64().unwrap_or_default().max(0.0)))
        }
        "str" | "string" => ArgValue::String(value.as_str().unwrap_or_default().to_owned()),
        "id" | "identifier" => ArgValue::Identifier(Identifier::new(value.as_str().unwrap_or_default())),
        // Unrecognized type tag: infer from the JSON value's own shape rather
        // than dropping the argument.
        _ => arg_value_from_shape(value),
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireEvent {
    Begin {
        #[serde(default)]
        start_wallclock_ms: i64,
        session: String,
        identity: String,
    },
    Description {
        offset: f32,
        source: String,
        display_name: String,
        description: String,
        #[serde(default)]
        instance: u64,
    },
    DeclareState {
        offset: f32,
        source: String,
        state_tag: String,
        begin_tag: String,
        end_tag: String,
        #[serde(default)]
        instance: u64,
    },
    ActiveState {
        offset: f32,
        source: String,
        tag: String,
        #[serde(default)]
        instance: u64,
    },
    Message {
        offset: f32,
        format: String,
        severity: String,
        source: String,
        #[serde(default)]
        tag: String,
        #[serde(default)]
        instance: u64,
        #[serde(default)]
        args: Vec<WireArg>,
    },
    Interval {
        tag: String,
        #[serde(default)]
        instance: u64,
        duration_ns: u64,
    },
    Heartbeat {
        offset: f32,
    },
    Finish {
        offset: f32,
        clean: bool,
    },
}

/// Maps a decoded wire event to the sink-facing [`Incoming`] record,
/// dropping `Message` events below `threshold` (the log backend severity
/// filter). Returns `None` when the event is filtered.
fn wire_to_incoming(event: WireEvent, threshold: Severity) -> Option<Incoming> {
    Some(match event {
        WireEvent::Begin {
            start_wallclock_ms,
            session,
            identity,
        } => Incoming::Begin(Begin {
            start_wallclock_unix_ms: start_wallclock_ms,
            session,
            identity,
        }),
        WireEvent::Description {
            offset,
            source,
            display_name,
            description,
            instance,
        } => Incoming::Description(Description {
            offset,
            source: Identifier::new(&source),
            display_name,
            description,
            instance,
        }),
        WireEvent::DeclareState {
            offset,
            source,
            state_tag,
            begin_tag,
            end_tag,
            instance,
        } => Incoming::DeclareState(DeclareState {
            offset,
            source: Identifier::new(&source),
            state_tag: Identifier::new(&state_tag),
            begin_tag: Identifier::new(&begin_tag),
            end_tag: Identifier::new(&end_tag),
            instance,
        }),
        WireEvent::ActiveState {
            offset,
            source,
            tag,
            instance,
        } => Incoming::ActiveState(ActiveState {
            offset,
            source: Identifier::new(&source),
            tag: Identifier::new(&tag),
            instance,
        }),
        WireEvent::Message {
            offset,
            format,
            severity,
            source,
            tag,
            instance,
            args,
        } => {
            let severity = Severity::from_name(&severity).unwrap_or_else(|| {
                warn!(%severity, "unknown severity name, treating as info");
                Severity::Info
            });
            if severity < threshold {
                return None;
            }
            let args = args
                .into_iter()
                .map(|a| log_model::Arg {
                    name: Identifier::new(&a.name),
                    tag: Identifier::new(&a.tag),
                    value: arg_value_from_wire(&a.tag, &a.value),
                    min: a.min,
                    max: a.max,
                })
                .collect();
            Incoming::Message(Message {
                offset,
                format,
                severity,
                source: Identifier::new(&source),
                tag: Identifier::new(&tag),
                instance,
                args,
            })
        }
        WireEvent::Interval {
            tag,
            instance,
            duration_ns,
        } => Incoming::Interval(Interval {
            tag: Identifier::new(&tag),
            instance,
            duration: Duration::from_nanos(duration_ns),
        }),
        WireEvent::Heartbeat { offset } => Incoming::Heartbeat(Heartbeat { offset }),
        WireEvent::Finish { offset, clean } => Incoming::Finish(Finish { offset, clean }),
    })
}

fn incoming_offset(incoming: &Incoming) -> Option<f32> {
    match incoming {
        Incoming::Begin(_) | Incoming::Interval(_) => None,
        Incoming::Description(d) => Some(d.offset),
        Incoming::DeclareState(d) => Some(d.offset),
        Incoming::ActiveState(a) => Some(a.offset),
        Incoming::Message(m) => Some(m.offset),
        Incoming::Heartbeat(h) => Some(h.offset),
        Incoming::Finish(f) => Some(f.offset),
    }
}

enum Frame {
    Object(Map<String, Value>, Option<String>),
    Array(Vec<Value>),
}

/// A [`Visitor`] that reconstructs one JSON object per parsed value using a
/// stack of in-progress containers, then dispatches the decoded event to
/// `sink`. One instance is owned per accepted connection: one parser, one
/// sink.
pub struct WireAdapter {
    sink: Rc<RefCell<dyn StreamSink>>,
    severity_threshold: Severity,
    stack: Vec<Frame>,
    result: Option<Value>,
    last_offset: f32,
    already_failed: bool,
}

impl WireAdapter {
    pub fn new(sink: Rc<RefCell<dyn StreamSink>>, severity_threshold: Severity) -> Self {
        WireAdapter {
            sink,
            severity_threshold,
            stack: Vec::new(),
            result: None,
            last_offset: 0.0,
            already_failed: false,
        }
    }

    fn place(&mut self, value: Value) {
        match self.stack.last_mut() {
            None => self.result = Some(value),
            Some(Frame::Object(map, key)) => {
                if let Some(k) = key.take() {
                    map.insert(k, value);
                }
            }
            Some(Frame::Array(items)) => items.push(value),
        }
    }

    /// Connection lost (read error or EOF) mid-stream: abort per the
    /// `Open -> Aborted` transition, discarding the backlog. No-op if the
    /// stream already closed cleanly.
    pub fn on_disconnect(&mut self) {
        if self.sink.borrow().state() == SinkState::Open {
            self.sink.borrow_mut().abort();
        }
    }

    /// stdin reached EOF without a prior `finish`: synthesize
    /// `finish{clean=false}` rather than treating it as an abrupt
    /// disconnect.
    pub fn on_stdin_eof(&mut self) {
        if self.sink.borrow().state() == SinkState::Open {
            self.sink.borrow_mut().accept(Incoming::Finish(Finish {
                offset: self.last_offset,
                clean: false,
            }));
        }
    }
}

impl Visitor for WireAdapter {
    fn begin(&mut self) -> bool {
        self.stack.clear();
        self.result = None;
        true
    }

    fn finish(&mut self) -> bool {
        let Some(value) = self.result.take() else {
            return true;
        };
        let wire: WireEvent = match serde_json::from_value(value) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "dropping an event object that didn't match any known kind");
                return true;
            }
        };
        if let Some(incoming) = wire_to_incoming(wire, self.severity_threshold) {
            if let Some(offset) = incoming_offset(&incoming) {
                self.last_offset = offset;
            }
            self.sink.borrow_mut().accept(incoming);
        }
        true
    }

    fn failed(&mut self) {
        if self.already_failed {
            return;
        }
        self.already_failed = true;
        if self.sink.borrow().state() == SinkState::Open {
            self.sink.borrow_mut().accept(Incoming::Finish(Finish {
                offset: self.last_offset,
                clean: false,
            }));
        }
    }

    fn begin_struct(&mut self) -> bool {
        self.stack.push(Frame::Object(Map::new(), None));
        true
    }

    fn finish_struct(&mut self) -> bool {
        if let Some(Frame::Object(map, _)) = self.stack.pop() {
            self.place(Value::Object(map));
        }
        true
    }

    fn begin_list(&mut self) -> bool {
        self.stack.push(Frame::Array(Vec::new()));
        true
    }

    fn finish_list(&mut self) -> bool {
        if let Some(Frame::Array(items)) = self.stack.pop() {
            self.place(Value::Array(items));
        }
        true
    }

    fn begin_attribute(&mut self, name: &str) -> bool {
        if let Some(Frame::Object(_, key)) = self.stack.last_mut() {
            *key = Some(name.to_owned());
        }
        true
    }

    fn finish_attribute(&mut self, _name: &str) -> bool {
        true
    }

    fn consume_bool(&mut self, v: bool) -> bool {
        self.place(Value::Bool(v));
        true
    }

    fn consume_i64(&mut self, v: i64) -> bool {
        self.place(Value::Number(v.into()));
        true
    }

    fn consume_u64(&mut self, v: u64) -> bool {
        self.place(Value::Number(v.into()));
        true
    }

    fn consume_f64(&mut self, v: f64) -> bool {
        self.place(Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null));
        true
    }

    fn consume_str(&mut self, v: &str) -> bool {
        self.place(Value::String(v.to_owned()));
        true
    }

    fn consume_null(&mut self) -> bool {
        self.place(Value::Null);
        true
    }
}
