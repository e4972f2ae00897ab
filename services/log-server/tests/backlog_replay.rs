//! End-to-end scenario: a downstream that refuses the
//! first 3 dispatched events still observes every event in original order
//! once it starts accepting, and the backlog never holds more than what's
//! actually pending.

use log_model::{Begin, Event, Finish, Message, Severity};
use log_sink::{Consumer, Incoming, PerStreamSink, StreamSink};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct RefusingConsumer {
    refusals_remaining: u32,
    accepted: Vec<Event>,
}

impl Consumer for RefusingConsumer {
    fn consume(&mut self, _stream_id: u64, event: &Event) -> bool {
        if self.refusals_remaining > 0 {
            self.refusals_remaining -= 1;
            return false;
        }
        self.accepted.push(event.clone());
        true
    }
}

fn message(offset: f32) -> Incoming {
    Incoming::Message(Message {
        offset,
        format: "m".into(),
        severity: Severity::Info,
        source: log_ident::Identifier::new("app"),
        tag: log_ident::Identifier::new("t"),
        instance: 0,
        args: vec![],
    })
}

#[test]
fn refused_events_replay_in_order_once_downstream_accepts() {
    let consumer = Rc::new(RefCell::new(RefusingConsumer {
        refusals_remaining: 3,
        accepted: Vec::new(),
    }));
    let mut sink = PerStreamSink::new(1, Rc::clone(&consumer), Duration::from_secs(120));

    // E1: Begin is refused 3 times (peaks the backlog at 3 while E2/E3 queue
    // up behind it), then the 4th event (E4) flushes everything.
    sink.accept(Incoming::Begin(Begin {
        start_wallclock_unix_ms: 0,
        session: "s".into(),
        identity: "i".into(),
    }));
    assert_eq!(sink.backlog_len(), 1);

    sink.accept(message(1.0));
    assert_eq!(sink.backlog_len(), 2);

    sink.accept(message(2.0));
    assert_eq!(sink.backlog_len(), 3, "backlog peaks at 3 refused events");

    sink.accept(message(3.0));
    assert_eq!(sink.backlog_len(), 0, "the 4th accept flushes the whole backlog");

    sink.accept(Incoming::Finish(Finish {
        offset: 4.0,
        clean: true,
    }));

    let accepted = consumer.borrow().accepted.clone();
    assert_eq!(accepted.len(), 5, "E1..E4 plus the final Finish");
    assert!(matches!(accepted[0], Event::Begin(_)));
    assert!(matches!(accepted[1], Event::Message(ref m) if m.offset == 1.0));
    assert!(matches!(accepted[2], Event::Message(ref m) if m.offset == 2.0));
    assert!(matches!(accepted[3], Event::Message(ref m) if m.offset == 3.0));
    assert!(matches!(accepted[4], Event::Finish(_)));
}
