//! The per-stream sink contract, backlog replay, and sink-factory fan-out.
//!
//! One [`PerStreamSink`] is created per accepted producer connection. It
//! holds the stream's latched identity, its own [`AggregationEngine`], and a
//! FIFO backlog of events the downstream consumer has refused. A
//! [`CombinedSinkFactory`] fans a stream out to several child factories at
//! once, each tracking its own backlog independently.

use log_ident::Identifier;
use log_model::{
    ActiveState, AggregateInterval, Begin, DeclareState, Description, Event, Finish, Heartbeat,
    Interval, Message,
};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::trace;

/// The raw per-event inputs a parser adapter hands to a sink, before
/// aggregation folds `Interval` samples into `AggregateInterval` records.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Begin(Begin),
    Description(Description),
    DeclareState(DeclareState),
    ActiveState(ActiveState),
    Message(Message),
    Interval(Interval),
    Heartbeat(Heartbeat),
    Finish(Finish),
}

/// A downstream consumer of dispatched events — a rendering output, a
/// database sink, or a stub. `consume` returning `false` means "try again
/// later"; the sink is solely responsible for buffering on that signal.
pub trait Consumer {
    fn consume(&mut self, stream_id: u64, event: &Event) -> bool;

    /// Periodic non-blocking background work (connection progress, socket
    /// poll). Called once per loop tick by the owning factory.
    fn update(&mut self) {}
}

/// Always accepts. Used for the InfluxDB/libpq scaffolds, which never
/// actually write anything.
#[derive(Default)]
pub struct StubConsumer;

impl Consumer for StubConsumer {
    fn consume(&mut self, _stream_id: u64, _event: &Event) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Fresh,
    Open,
    Closed,
    Aborted,
}

/// The polymorphic consumer of structured events for one producer
/// connection. Implementors own whatever per-stream state they need; the
/// only thing the factory/fan-out layer requires is the ability to accept
/// raw events and report lifecycle state.
pub trait StreamSink {
    fn stream_id(&self) -> u64;
    fn accept(&mut self, incoming: Incoming);
    fn state(&self) -> SinkState;
    /// Connection lost; discard the backlog and stop accepting further events.
    fn abort(&mut self);
}

/// One producer connection's sink: backlog FIFO, aggregation engine, and the
/// `Fresh -> Open -> Closed`/`Aborted` state machine from the sink contract.
pub struct PerStreamSink<C: Consumer> {
    id: u64,
    root: Option<Identifier>,
    prev_offset: f32,
    state: SinkState,
    aggregator: log_aggregate::AggregationEngine,
    backlog: VecDeque<Event>,
    consumer: Rc<RefCell<C>>,
}

impl<C: Consumer> PerStreamSink<C> {
    pub fn new(id: u64, consumer: Rc<RefCell<C>>, window: Duration) -> Self {
        PerStreamSink {
            id,
            root: None,
            prev_offset: 0.0,
            state: SinkState::Fresh,
            aggregator: log_aggregate::AggregationEngine::new(window),
            backlog: VecDeque::new(),
            consumer,
        }
    }

    pub fn root(&self) -> Option<Identifier> {
        self.root
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn dispatch(&mut self, event: Event) {
        // Flush backlog head-of-line first; stop at the first refusal.
        while let Some(front) = self.backlog.front() {
            if self.consumer.borrow_mut().consume(self.id, front) {
                self.backlog.pop_front();
            } else {
                break;
            }
        }
        if self.backlog.is_empty() {
            if !self.consumer.borrow_mut().consume(self.id, &event) {
                self.backlog.push_back(event);
            }
        } else {
            // head-of-line still blocked: preserve order behind it
            self.backlog.push_back(event);
        }
    }
}

impl<C: Consumer> StreamSink for PerStreamSink<C> {
    fn stream_id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> SinkState {
        self.state
    }

    fn abort(&mut self) {
        trace!(stream_id = self.id, "sink aborted, discarding backlog");
        self.state = SinkState::Aborted;
        self.backlog.clear();
    }

    fn accept(&mut self, incoming: Incoming) {
        match incoming {
            Incoming::Begin(b) => {
                if self.state != SinkState::Fresh {
                    trace!(stream_id = self.id, "ignoring duplicate begin");
                    return;
                }
                self.state = SinkState::Open;
                self.dispatch(Event::Begin(b));
            }
            _ if self.state != SinkState::Open => {
                trace!(stream_id = self.id, state = ?self.state, "dropping event outside Open state");
            }
            Incoming::Description(d) => {
                self.prev_offset = d.offset;
                self.dispatch(Event::Description(d));
            }
            Incoming::DeclareState(d) => {
                self.prev_offset = d.offset;
                self.dispatch(Event::DeclareState(d));
            }
            Incoming::ActiveState(a) => {
                self.prev_offset = a.offset;
                self.dispatch(Event::ActiveState(a));
            }
            Incoming::Message(m) => {
                if self.root.is_none() {
                    self.root = Some(m.source);
                }
                self.prev_offset = m.offset;
                self.dispatch(Event::Message(m));
            }
            Incoming::Interval(i) => {
                if let Some(agg) = self.aggregator.update(i.tag, i.instance, i.duration) {
                    self.aggregator.reset(i.tag, i.instance);
                    self.dispatch(Event::AggregateInterval(agg));
                }
            }
            Incoming::Heartbeat(h) => {
                self.prev_offset = h.offset;
                self.dispatch(Event::Heartbeat(h));
            }
            Incoming::Finish(f) => {
                self.prev_offset = f.offset;
                self.dispatch(Event::Finish(f));
                self.state = SinkState::Closed;
            }
        }
    }
}

/// Creates sinks, tracks them by id for eviction bookkeeping, and drives
/// their consumer's background work.
pub trait StreamSinkFactory {
    fn make_stream(&mut self) -> Rc<RefCell<dyn StreamSink>>;
    fn update(&mut self);
}

/// `StreamSinkFactory` backed by one `Consumer` implementation (a rendering
/// output, a stub, ...). Holds `Weak` references into the streams table
/// purely for eviction bookkeeping; the sink itself is owned by whoever
/// reads from its stream (the accept loop).
pub struct SimpleSinkFactory<C: Consumer> {
    next_id: u64,
    window: Duration,
    consumer: Rc<RefCell<C>>,
    streams: HashMap<u64, Weak<RefCell<PerStreamSink<C>>>>,
}

impl<C: Consumer> SimpleSinkFactory<C> {
    pub fn new(consumer: C) -> Self {
        SimpleSinkFactory {
            next_id: 1,
            window: log_aggregate::DEFAULT_WINDOW,
            consumer: Rc::new(RefCell::new(consumer)),
            streams: HashMap::new(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    fn prune_dead(&mut self) {
        self.streams.retain(|_, weak| weak.strong_count() > 0);
    }
}

impl<C: Consumer + 'static> StreamSinkFactory for SimpleSinkFactory<C> {
    fn make_stream(&mut self) -> Rc<RefCell<dyn StreamSink>> {
        let id = self.next_id;
        self.next_id += 1;
        let sink = Rc::new(RefCell::new(PerStreamSink::new(
            id,
            Rc::clone(&self.consumer),
            self.window,
        )));
        self.streams.insert(id, Rc::downgrade(&sink));
        sink as Rc<RefCell<dyn StreamSink>>
    }

    fn update(&mut self) {
        self.prune_dead();
        self.consumer.borrow_mut().update();
    }
}

/// Multicasts every incoming event to one sink per child factory. A child's
/// refusal never blocks its siblings — each child's `PerStreamSink` tracks
/// its own backlog.
pub struct CompositeSink {
    id: u64,
    children: Vec<Rc<RefCell<dyn StreamSink>>>,
}

impl StreamSink for CompositeSink {
    fn stream_id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> SinkState {
        // Open until every child has closed or aborted; Closed/Aborted once
        // all children agree, Open otherwise (a still-open child means the
        // stream is still live from the producer's point of view).
        if self
            .children
            .iter()
            .all(|c| matches!(c.borrow().state(), SinkState::Closed))
        {
            SinkState::Closed
        } else if self
            .children
            .iter()
            .all(|c| matches!(c.borrow().state(), SinkState::Aborted))
        {
            SinkState::Aborted
        } else {
            SinkState::Open
        }
    }

    fn abort(&mut self) {
        for child in &self.children {
            child.borrow_mut().abort();
        }
    }

    fn accept(&mut self, incoming: Incoming) {
        for child in &self.children {
            child.borrow_mut().accept(incoming.clone());
        }
    }
}

/// An ordered list of child factories, presented as a single factory.
pub struct CombinedSinkFactory {
    children: Vec<Box<dyn StreamSinkFactory>>,
    next_id: u64,
}

impl CombinedSinkFactory {
    pub fn new(children: Vec<Box<dyn StreamSinkFactory>>) -> Self {
        CombinedSinkFactory {
            children,
            next_id: 1,
        }
    }
}

impl StreamSinkFactory for CombinedSinkFactory {
    fn make_stream(&mut self) -> Rc<RefCell<dyn StreamSink>> {
        let id = self.next_id;
        self.next_id += 1;
        let children: Vec<_> = self.children.iter_mut().map(|f| f.make_stream()).collect();
        Rc::new(RefCell::new(CompositeSink { id, children })) as Rc<RefCell<dyn StreamSink>>
    }

    fn update(&mut self) {
        for child in &mut self.children {
            child.update();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log_model::{ArgValue, Severity};

    #[derive(Default)]
    struct RecordingConsumer {
        accepted: Vec<Event>,
        refuse_next: bool,
    }

    impl Consumer for RecordingConsumer {
        fn consume(&mut self, _stream_id: u64, event: &Event) -> bool {
            if self.refuse_next {
                self.refuse_next = false;
                return false;
            }
            self.accepted.push(event.clone());
            true
        }
    }

    fn begin() -> Incoming {
        Incoming::Begin(Begin {
            start_wallclock_unix_ms: 0,
            session: "s".into(),
            identity: "app".into(),
        })
    }

    fn message(offset: f32) -> Incoming {
        Incoming::Message(Message {
            offset,
            format: "hello ${who}".into(),
            severity: Severity::Info,
            source: Identifier::new("app"),
            tag: Identifier::new("greet"),
            instance: 0,
            args: vec![log_model::Arg::new(
                "who",
                "str",
                ArgValue::String("world".into()),
            )],
        })
    }

    #[test]
    fn ignores_events_before_begin() {
        let consumer = RecordingConsumer::default();
        let mut sink = PerStreamSink::new(1, Rc::new(RefCell::new(consumer)), Duration::from_secs(60));
        sink.accept(message(1.0));
        assert_eq!(sink.state(), SinkState::Fresh);
    }

    #[test]
    fn begin_opens_the_stream_and_latches_root_on_first_message() {
        let consumer = Rc::new(RefCell::new(RecordingConsumer::default()));
        let mut sink = PerStreamSink::new(1, Rc::clone(&consumer), Duration::from_secs(60));
        sink.accept(begin());
        assert_eq!(sink.state(), SinkState::Open);
        sink.accept(message(1.0));
        assert_eq!(sink.root(), Some(Identifier::new("app")));
        assert_eq!(consumer.borrow().accepted.len(), 2);
    }

    #[test]
    fn refused_event_is_backlogged_and_replayed_in_order() {
        let consumer = Rc::new(RefCell::new(RecordingConsumer::default()));
        let mut sink = PerStreamSink::new(1, Rc::clone(&consumer), Duration::from_secs(60));
        sink.accept(begin());
        consumer.borrow_mut().refuse_next = true;
        sink.accept(message(1.0));
        assert_eq!(sink.backlog_len(), 1);
        sink.accept(message(2.0));
        assert_eq!(sink.backlog_len(), 2, "second event queues behind the blocked head");

        sink.accept(message(3.0));
        assert_eq!(sink.backlog_len(), 3);

        // next accept flushes everything now that nothing refuses
        sink.accept(message(4.0));
        assert_eq!(sink.backlog_len(), 0);
        assert_eq!(consumer.borrow().accepted.len(), 1 + 4);
    }

    #[test]
    fn finish_closes_the_stream_and_drops_further_events() {
        let consumer = Rc::new(RefCell::new(RecordingConsumer::default()));
        let mut sink = PerStreamSink::new(1, Rc::clone(&consumer), Duration::from_secs(60));
        sink.accept(begin());
        sink.accept(Incoming::Finish(Finish {
            offset: 5.0,
            clean: true,
        }));
        assert_eq!(sink.state(), SinkState::Closed);
        sink.accept(message(6.0));
        assert_eq!(consumer.borrow().accepted.len(), 2);
    }

    #[test]
    fn abort_discards_backlog() {
        let consumer = Rc::new(RefCell::new(RecordingConsumer::default()));
        let mut sink = PerStreamSink::new(1, Rc::clone(&consumer), Duration::from_secs(60));
        sink.accept(begin());
        consumer.borrow_mut().refuse_next = true;
        sink.accept(message(1.0));
        assert_eq!(sink.backlog_len(), 1);
        sink.abort();
        assert_eq!(sink.backlog_len(), 0);
        assert_eq!(sink.state(), SinkState::Aborted);
    }

    #[test]
    fn factory_allocates_monotonic_ids() {
        let mut factory = SimpleSinkFactory::new(RecordingConsumer::default());
        let a = factory.make_stream();
        let b = factory.make_stream();
        assert_eq!(a.borrow().stream_id(), 1);
        assert_eq!(b.borrow().stream_id(), 2);
    }

    #[test]
    fn combined_factory_fans_out_to_every_child() {
        let a = SimpleSinkFactory::new(RecordingConsumer::default());
        let b = SimpleSinkFactory::new(RecordingConsumer::default());
        let mut combined = CombinedSinkFactory::new(vec![Box::new(a), Box::new(b)]);
        let sink = combined.make_stream();
        sink.borrow_mut().accept(begin());
        sink.borrow_mut().accept(message(1.0));
        assert_eq!(sink.borrow().state(), SinkState::Open);
    }
}
