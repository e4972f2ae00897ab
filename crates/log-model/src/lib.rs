//! The event records the log ingestion pipeline passes from parser to sink.
//!
//! Every record carries `offset`: seconds elapsed since the producing
//! stream's `Begin` event. Mirrors the event shapes consumed by
//! `stream_sink::consume(...)` in the original EAGine `log_server`.

use log_ident::Identifier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Severity, ascending. Producers may filter below a configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Debug,
    Stat,
    Info,
    Warning,
    Error,
    Fatal,
    Backtrace,
}

impl Severity {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "trace" => Severity::Trace,
            "debug" => Severity::Debug,
            "stat" => Severity::Stat,
            "info" => Severity::Info,
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            "fatal" => Severity::Fatal,
            "backtrace" => Severity::Backtrace,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Stat => "stat",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
            Severity::Backtrace => "backtrace",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One message argument's typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    F32(f32),
    Duration(Duration),
    String(String),
    Identifier(Identifier),
}

/// A single message argument: name, type tag, value, and optional gauge bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    pub name: Identifier,
    pub tag: Identifier,
    pub value: ArgValue,
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl Arg {
    pub fn new(name: impl Into<Identifier>, tag: impl Into<Identifier>, value: ArgValue) -> Self {
        Arg {
            name: name.into(),
            tag: tag.into(),
            value,
            min: None,
            max: None,
        }
    }

    /// `true` if intrinsic bool; coerces 0/1 from an integral; else `None`
    /// (the original's "indeterminate" tribool collapses to `None` here).
    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            ArgValue::Bool(b) => Some(*b),
            ArgValue::I64(v) => match *v {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
            ArgValue::U64(v) => match *v {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.value {
            ArgValue::I64(v) => Some(*v),
            ArgValue::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match &self.value {
            ArgValue::U64(v) => Some(*v),
            ArgValue::I64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Succeeds for intrinsic float and for integrals (lossy allowed).
    pub fn as_f32(&self) -> Option<f32> {
        match &self.value {
            ArgValue::F32(v) => Some(*v),
            ArgValue::I64(v) => Some(*v as f32),
            ArgValue::U64(v) => Some(*v as f32),
            _ => None,
        }
    }

    /// Succeeds for duration, for float (seconds), and for integrals (seconds).
    pub fn as_duration(&self) -> Option<Duration> {
        match &self.value {
            ArgValue::Duration(d) => Some(*d),
            ArgValue::F32(v) if *v >= 0.0 => Some(Duration::from_secs_f32(*v)),
            ArgValue::I64(v) if *v >= 0 => Some(Duration::from_secs(*v as u64)),
            ArgValue::U64(v) => Some(Duration::from_secs(*v)),
            _ => None,
        }
    }

    /// Succeeds only for an intrinsic string.
    pub fn as_string(&self) -> Option<&str> {
        match &self.value {
            ArgValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Helper mirroring the original's `value_or(default)` coercion pattern.
pub fn value_or<T>(opt: Option<T>, default: T) -> T {
    opt.unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Begin {
    pub start_wallclock_unix_ms: i64,
    pub session: String,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub offset: f32,
    pub source: Identifier,
    pub display_name: String,
    pub description: String,
    pub instance: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclareState {
    pub offset: f32,
    pub source: Identifier,
    pub state_tag: Identifier,
    pub begin_tag: Identifier,
    pub end_tag: Identifier,
    pub instance: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveState {
    pub offset: f32,
    pub source: Identifier,
    pub tag: Identifier,
    pub instance: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub offset: f32,
    pub format: String,
    pub severity: Severity,
    pub source: Identifier,
    pub tag: Identifier,
    pub instance: u64,
    pub args: Vec<Arg>,
}

impl Message {
    pub fn find_arg(&self, name: Identifier) -> Option<&Arg> {
        self.args.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub tag: Identifier,
    pub instance: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub offset: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Finish {
    pub offset: f32,
    pub clean: bool,
}

/// Windowed reduction of interval samples for one `(tag, instance)` key,
/// emitted by the aggregation engine in place of raw intervals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateInterval {
    pub tag: Identifier,
    pub instance: u64,
    pub duration_sum: Duration,
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub hit_interval: Duration,
}

impl AggregateInterval {
    /// `None` when `count == 0` (undefined average).
    pub fn avg(&self) -> Option<Duration> {
        if self.count == 0 {
            None
        } else {
            Some(self.duration_sum / self.count as u32)
        }
    }
}

/// The tagged sum of all event records the pipeline passes downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Begin(Begin),
    Description(Description),
    DeclareState(DeclareState),
    ActiveState(ActiveState),
    Message(Message),
    Heartbeat(Heartbeat),
    Finish(Finish),
    /// Not produced by the wire parser (raw intervals never reach a sink
    /// directly, per spec) but kept in the sum type so aggregator output
    /// can be dispatched through the same `Event::*` match arms as every
    /// other record.
    AggregateInterval(AggregateInterval),
}

impl Event {
    pub fn offset(&self) -> f32 {
        match self {
            Event::Begin(_) => 0.0,
            Event::Description(d) => d.offset,
            Event::DeclareState(d) => d.offset,
            Event::ActiveState(a) => a.offset,
            Event::Message(m) => m.offset,
            Event::Heartbeat(h) => h.offset,
            Event::Finish(f) => f.offset,
            Event::AggregateInterval(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(value: ArgValue) -> Arg {
        Arg::new("who", "str", value)
    }

    #[test]
    fn bool_coercion_from_integral() {
        let a = arg(ArgValue::I64(1));
        assert_eq!(a.as_bool(), Some(true));
        assert_eq!(a.as_i64(), Some(1));
        assert_eq!(a.as_string(), None);
    }

    #[test]
    fn bool_coercion_indeterminate_for_other_integers() {
        let a = arg(ArgValue::I64(2));
        assert_eq!(a.as_bool(), None);
    }

    #[test]
    fn u64_does_not_fit_i32_but_fits_i64_and_f32() {
        let a = arg(ArgValue::U64(70_000));
        assert_eq!(a.as_i32(), None);
        assert_eq!(a.as_i64(), Some(70_000));
        assert_eq!(a.as_f32(), Some(70_000.0));
    }

    #[test]
    fn string_only_succeeds_for_intrinsic_string() {
        let a = arg(ArgValue::String("world".to_owned()));
        assert_eq!(a.as_string(), Some("world"));
        assert_eq!(arg(ArgValue::I64(1)).as_string(), None);
    }

    #[test]
    fn accessors_are_pure_and_idempotent() {
        let a = arg(ArgValue::U64(42));
        assert_eq!(a.as_i64(), a.as_i64());
        assert_eq!(a.as_f32(), a.as_f32());
    }

    #[test]
    fn value_or_falls_back_only_when_empty() {
        assert_eq!(value_or(Some(3), 0), 3);
        assert_eq!(value_or(None::<i32>, 7), 7);
    }

    #[test]
    fn aggregate_avg_undefined_when_empty() {
        let agg = AggregateInterval {
            tag: Identifier::new("T"),
            instance: 1,
            duration_sum: Duration::ZERO,
            count: 0,
            min: Duration::ZERO,
            max: Duration::ZERO,
            hit_interval: Duration::from_secs(120),
        };
        assert_eq!(agg.avg(), None);
    }
}
