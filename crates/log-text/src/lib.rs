//! Box-drawing ASCII tree renderer for the event stream, one lane per
//! active producer connection.
//!
//! Ported from `ostream_sink_impl.cpp`'s connector-glyph helpers
//! (`_conn_I`/`_conn_L`/`_conn_S`/`_conn_s`/`_conn_Z`/`_conn_T`): each
//! drawn line starts with a column per currently-open stream, with the
//! target stream's column replaced by a connector glyph and everything to
//! its right redrawn as a horizontal joiner.

use log_ident::Identifier;
use log_model::{ArgValue, Event};
use log_sink::Consumer;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

/// A destination for rendered text chunks. `flush` drains any buffering
/// (a socket writer's event-loop poll, a file's fsync, ...).
pub trait TextOutput {
    fn write(&mut self, chunk: &str);
    fn flush(&mut self);
}

/// Writes to the process's standard output.
#[derive(Default)]
pub struct StdoutOutput;

impl TextOutput for StdoutOutput {
    fn write(&mut self, chunk: &str) {
        let _ = std::io::stdout().write_all(chunk.as_bytes());
    }

    fn flush(&mut self) {
        let _ = std::io::stdout().flush();
    }
}

/// Fans each chunk out to every child output, in order, before returning —
/// every child sees chunk *N* before any child sees chunk *N+1*.
pub struct CombinedTextOutput {
    children: Vec<Box<dyn TextOutput>>,
}

impl CombinedTextOutput {
    pub fn new(children: Vec<Box<dyn TextOutput>>) -> Self {
        CombinedTextOutput { children }
    }
}

impl TextOutput for CombinedTextOutput {
    fn write(&mut self, chunk: &str) {
        for child in &mut self.children {
            child.write(chunk);
        }
    }

    fn flush(&mut self) {
        for child in &mut self.children {
            child.flush();
        }
    }
}

struct StreamCtx {
    root: Option<Identifier>,
    prev_offset: f32,
}

/// The text-tree renderer. One instance is shared (via `Rc<RefCell<_>>`, as
/// a [`log_sink::Consumer`]) across every sink the owning factory creates,
/// the same way `ostream_output` is shared by every `ostream_sink` it makes.
pub struct TextTreeOutput {
    output: Box<dyn TextOutput>,
    streams: BTreeMap<u64, StreamCtx>,
}

impl TextTreeOutput {
    pub fn new(output: Box<dyn TextOutput>) -> Self {
        let mut out = output;
        out.write("╮\n");
        TextTreeOutput {
            output: out,
            streams: BTreeMap::new(),
        }
    }

    fn conn_i(&mut self) {
        self.output.write("┊");
        for _ in &self.streams {
            self.output.write(" │");
        }
    }

    fn conn_t(&mut self) {
        self.output.write("┝");
        for _ in &self.streams {
            self.output.write("━━");
        }
        self.output.write("━┯━┥");
    }

    fn conn_l(&mut self, id: u64) {
        self.output.write("┊");
        let mut conn = true;
        let ids: Vec<u64> = self.streams.keys().copied().collect();
        for k in ids {
            if k == id {
                self.output.write(" ┕");
                conn = false;
            } else if conn {
                self.output.write(" │");
            } else {
                self.output.write("━━");
            }
        }
        self.output.write("━┥");
    }

    fn conn_s_upper(&mut self, id: u64) {
        self.output.write("┊");
        let mut conn = true;
        let ids: Vec<u64> = self.streams.keys().copied().collect();
        for k in ids {
            if k == id {
                self.output.write("  ");
                conn = false;
            } else if conn {
                self.output.write(" │");
            } else {
                self.output.write("╭╯");
            }
        }
    }

    fn conn_s_lower(&mut self, id: u64) {
        self.output.write("┊");
        let mut conn = true;
        let ids: Vec<u64> = self.streams.keys().copied().collect();
        for k in ids {
            if k == id {
                self.output.write(" ");
                conn = false;
            } else if conn {
                self.output.write(" │");
            } else {
                self.output.write("╭╯");
            }
        }
    }

    fn conn_z(&mut self, id: u64) {
        self.output.write("┊");
        let mut conn = true;
        let ids: Vec<u64> = self.streams.keys().copied().collect();
        for k in ids {
            if k == id {
                self.output.write(" ┝");
                conn = false;
            } else if conn {
                self.output.write(" │");
            } else {
                self.output.write("━━");
            }
        }
    }
}

fn padded(width: usize, s: &str) -> String {
    if s.len() >= width {
        s[..width].to_owned()
    } else {
        format!("{s:<width$}", width = width)
    }
}

fn format_reltime(micros: i64) -> String {
    let micros = micros.max(0);
    if micros < 1_000 {
        format!("{micros}us")
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    }
}

fn render_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        format!("{micros}us")
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}

fn render_arg_value(value: &ArgValue) -> String {
    match value {
        ArgValue::Bool(b) => b.to_string(),
        ArgValue::I64(v) => v.to_string(),
        ArgValue::U64(v) => v.to_string(),
        ArgValue::F32(v) => format!("{v:.3}"),
        ArgValue::Duration(d) => render_duration(*d),
        ArgValue::String(s) => s.clone(),
        ArgValue::Identifier(id) => id.to_string(),
    }
}

/// Substitutes `${name}` placeholders in `format` with the matching
/// argument's rendered value. A placeholder with no matching argument is
/// left untranslated, literal `${name}` and all.
fn format_message(format: &str, args: &[log_model::Arg]) -> String {
    let mut out = String::with_capacity(format.len());
    let bytes = format.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = format[i + 2..].find('}') {
                let name = &format[i + 2..i + 2 + end];
                match args.iter().find(|a| a.name.as_str() == name) {
                    Some(arg) => out.push_str(&render_arg_value(&arg.value)),
                    None => out.push_str(&format[i..i + 2 + end + 1]),
                }
                i += 2 + end + 1;
                continue;
            }
        }
        out.push(format[i..].chars().next().unwrap());
        i += format[i..].chars().next().unwrap().len_utf8();
    }
    out
}

impl Consumer for TextTreeOutput {
    fn consume(&mut self, stream_id: u64, event: &Event) -> bool {
        match event {
            Event::Begin(_) => {
                self.conn_i();
                self.output.write("   ╭────────────╮\n");
                self.conn_t();
                self.output.write("starting log│\n");
                self.conn_i();
                self.output.write(" │ ╰────────────╯\n");
                self.streams.insert(
                    stream_id,
                    StreamCtx {
                        root: None,
                        prev_offset: 0.0,
                    },
                );
            }
            Event::Message(m) => {
                let since_start = (m.offset.max(0.0) * 1_000_000.0) as i64;
                let ctx_prev = self
                    .streams
                    .get(&stream_id)
                    .map(|c| c.prev_offset)
                    .unwrap_or(0.0);
                let since_prev = ((m.offset - ctx_prev) * 1_000_000.0) as i64;
                if let Some(ctx) = self.streams.get_mut(&stream_id) {
                    if ctx.root.is_none() {
                        ctx.root = Some(m.source);
                    }
                    ctx.prev_offset = m.offset;
                }
                let root = self
                    .streams
                    .get(&stream_id)
                    .and_then(|c| c.root)
                    .unwrap_or(m.source);

                self.conn_z(stream_id);
                self.output.write("━┑");
                self.output.write(&padded(10, &format_reltime(since_start)));
                self.output.write("│");
                self.output.write(&padded(10, &format_reltime(since_prev)));
                self.output.write("│");
                self.output.write(&padded(9, m.severity.name()));
                self.output.write("│");
                self.output.write(&padded(10, &root.to_string()));
                self.output.write("│");
                self.output.write(&padded(10, &m.source.to_string()));
                self.output.write("│");
                let has_tag = !m.tag.is_empty();
                if has_tag {
                    self.output.write(&padded(10, &m.tag.to_string()));
                    self.output.write("│");
                }
                self.output.write(&padded(12, &m.instance.to_string()));
                self.output.write("│\n");

                self.conn_i();
                if has_tag {
                    self.output.write(
                        " ├──────────┴──────────┴─────────┴\
──────────┴──────────┴──────────┴────────────╯\n",
                    );
                } else {
                    self.output.write(
                        " ├──────────┴──────────┴─────────┴\
──────────┴──────────┴────────────╯\n",
                    );
                }
                self.conn_i();
                self.output.write(" ╰─┤");
                self.output.write(&format_message(&m.format, &m.args));
                self.output.write("\n");
            }
            Event::Heartbeat(_) => {
                // no visible output, matches the original's no-op consume
            }
            Event::Finish(f) => {
                let ctx_prev = self
                    .streams
                    .get(&stream_id)
                    .map(|c| c.prev_offset)
                    .unwrap_or(0.0);
                let since_start = (f.offset.max(0.0) * 1_000_000.0) as i64;
                let since_prev = ((f.offset - ctx_prev) * 1_000_000.0) as i64;

                self.conn_i();
                self.output
                    .write(" ╭──────────┬──────────┬────────────┬─────────╮\n");
                self.conn_l(stream_id);
                self.output.write(&padded(10, &format_reltime(since_start)));
                self.output.write("│");
                self.output.write(&padded(10, &format_reltime(since_prev)));
                self.output.write("│ closing log│");
                self.output
                    .write(if f.clean { " success " } else { " failed  " });
                self.output.write("│\n");
                self.conn_s_upper(stream_id);
                self.output
                    .write(" ╰──────────┴──────────┴────────────┴─────────╯\n");
                self.conn_s_lower(stream_id);
                self.output.write("\n");
                self.streams.remove(&stream_id);
            }
            // Description/DeclareState/ActiveState/AggregateInterval have no
            // rendering in the text tree, matching the original ostream
            // sink which only overrides consume for begin/message/
            // heartbeat/finish.
            _ => {}
        }
        true
    }

    fn update(&mut self) {
        self.output.flush();
    }
}
