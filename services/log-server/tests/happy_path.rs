//! End-to-end scenario: one stream, one message, rendered through the real
//! sink + text-tree pipeline (begin -> message -> finish), asserting on the
//! rendered text rather than on individual component unit state.

use log_ident::Identifier;
use log_model::{Arg, ArgValue, Begin, Finish, Message, Severity};
use log_sink::{Incoming, PerStreamSink, StreamSink};
use log_text::{TextOutput, TextTreeOutput};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

struct CollectingOutput {
    text: Rc<RefCell<String>>,
}

impl TextOutput for CollectingOutput {
    fn write(&mut self, chunk: &str) {
        self.text.borrow_mut().push_str(chunk);
    }

    fn flush(&mut self) {}
}

#[test]
fn one_stream_one_message_renders_header_body_and_success_footer() {
    let text = Rc::new(RefCell::new(String::new()));
    let output = Box::new(CollectingOutput {
        text: Rc::clone(&text),
    });
    let tree = Rc::new(RefCell::new(TextTreeOutput::new(output)));
    let mut sink = PerStreamSink::new(1, Rc::clone(&tree), Duration::from_secs(120));

    sink.accept(Incoming::Begin(Begin {
        start_wallclock_unix_ms: 0,
        session: "S".into(),
        identity: "I".into(),
    }));
    sink.accept(Incoming::Message(Message {
        offset: 0.1,
        format: "hi ${who}".into(),
        severity: Severity::Info,
        source: Identifier::new("app"),
        tag: Identifier::new("hello"),
        instance: 1,
        args: vec![Arg::new("who", "str", ArgValue::String("world".into()))],
    }));
    sink.accept(Incoming::Finish(Finish {
        offset: 0.2,
        clean: true,
    }));

    let rendered = text.borrow().clone();
    assert!(rendered.contains("100.0ms"), "rendered:\n{rendered}");
    assert!(rendered.contains("info"), "rendered:\n{rendered}");
    assert!(rendered.contains("hello"), "rendered:\n{rendered}");
    assert!(rendered.contains("hi world"), "rendered:\n{rendered}");
    assert!(rendered.contains("success"), "rendered:\n{rendered}");
}
