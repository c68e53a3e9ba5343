//! Append-only correlation log with independent consumer cursors.
//!
//! The producer appends events (directly or through RAII scopes); consumers
//! hold cursors that only move forward. `expect_event` replaces sleep-loop
//! assertions: it polls on a short fixed interval and turns "the event never
//! arrived" into a hard error carrying a dump of everything buffered so far.

use std::cell::Cell;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::core::{ArgBag, Event};
use crate::error::Transience;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Producer handle for an append-only event log. Cheap to clone; all clones
/// share the same backing store.
///
/// Slots below any observed length are immutable once written; events are
/// never removed for the lifetime of the process.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<LogInner>,
}

struct LogInner {
    epoch: Instant,
    events: RwLock<Vec<Arc<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LogInner {
                epoch: Instant::now(),
                events: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn append(&self, event: Event) {
        let mut events = self.inner.events.write().expect("event log lock poisoned");
        events.push(Arc::new(event));
    }

    /// Append an instantaneous event (enter and exit stamps coincide).
    pub fn record(&self, name: &str, args: ArgBag) {
        let mono = self.mono_ms();
        let wall = wall_ms();
        self.append(Event {
            name: name.to_string(),
            depth: current_depth(),
            thread: thread_label(),
            enter_mono_ms: mono,
            exit_mono_ms: mono,
            enter_wall_ms: wall,
            exit_wall_ms: wall,
            args,
        });
    }

    /// Open a traced callback scope. The event is stamped with the enter
    /// time now and appended with the exit time when the guard finishes.
    /// Scopes on the same thread nest; the depth counter tracks nesting.
    pub fn scope(&self, name: &str, args: ArgBag) -> EventScope {
        let depth = SCOPE_DEPTH.with(|cell| {
            let depth = cell.get();
            cell.set(depth + 1);
            depth
        });
        EventScope {
            log: self.clone(),
            name: name.to_string(),
            args: Some(args),
            depth,
            enter_mono_ms: self.mono_ms(),
            enter_wall_ms: wall_ms(),
        }
    }

    /// Consistent prefix view. Appends may land concurrently; everything at
    /// an index below the returned length is already immutable.
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.inner
            .events
            .read()
            .expect("event log lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .events
            .read()
            .expect("event log lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh consumer cursor positioned at the start of the log.
    pub fn stream(&self) -> EventStream {
        self.stream_with_poll(DEFAULT_POLL_INTERVAL)
    }

    pub fn stream_with_poll(&self, poll_interval: Duration) -> EventStream {
        EventStream {
            log: self.clone(),
            cursor: 0,
            poll_interval,
        }
    }

    fn mono_ms(&self) -> u64 {
        self.inner.epoch.elapsed().as_millis() as u64
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static SCOPE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

fn current_depth() -> u32 {
    SCOPE_DEPTH.with(Cell::get)
}

fn thread_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// RAII guard for a traced callback; appends the event when dropped.
pub struct EventScope {
    log: EventLog,
    name: String,
    args: Option<ArgBag>,
    depth: u32,
    enter_mono_ms: u64,
    enter_wall_ms: u64,
}

impl EventScope {
    /// Explicit completion; equivalent to dropping the guard.
    pub fn finish(self) {}
}

impl Drop for EventScope {
    fn drop(&mut self) {
        SCOPE_DEPTH.with(|cell| cell.set(cell.get().saturating_sub(1)));
        self.log.append(Event {
            name: std::mem::take(&mut self.name),
            depth: self.depth,
            thread: thread_label(),
            enter_mono_ms: self.enter_mono_ms,
            exit_mono_ms: self.log.mono_ms(),
            enter_wall_ms: self.enter_wall_ms,
            exit_wall_ms: wall_ms(),
            args: self.args.take().unwrap_or_default(),
        });
    }
}

/// Consumer cursor over an [`EventLog`].
///
/// Cursors only move forward. `copy` branches an independent cursor at the
/// current position; neither copy affects the other afterwards.
pub struct EventStream {
    log: EventLog,
    cursor: usize,
    poll_interval: Duration,
}

impl EventStream {
    /// Non-consuming lookahead from the cursor to the latest known end.
    /// Never blocks, never advances the cursor.
    pub fn find_first<P>(&self, pred: P) -> Option<Arc<Event>>
    where
        P: Fn(&Event) -> bool,
    {
        let snapshot = self.log.snapshot();
        snapshot
            .iter()
            .skip(self.cursor)
            .find(|event| pred(event))
            .cloned()
    }

    /// Like [`find_first`](Self::find_first), but advances the cursor past
    /// the match on success. On failure the cursor is left untouched.
    pub fn seek_to_first<P>(&mut self, pred: P) -> Option<Arc<Event>>
    where
        P: Fn(&Event) -> bool,
    {
        let snapshot = self.log.snapshot();
        for (index, event) in snapshot.iter().enumerate().skip(self.cursor) {
            if pred(event) {
                self.cursor = index + 1;
                return Some(event.clone());
            }
        }
        None
    }

    /// Poll [`seek_to_first`](Self::seek_to_first) until a match appears or
    /// the timeout is exhausted. An expected event that never appears is
    /// always an error, never a valid "no event" outcome.
    pub fn expect_event<P>(&mut self, pred: P, timeout: Duration) -> Result<Arc<Event>, StreamError>
    where
        P: Fn(&Event) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.seek_to_first(&pred) {
                return Ok(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StreamError::ExpectTimeout {
                    waited: timeout,
                    dump: self.dump(),
                });
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Succeeds only if no match appears within the window. Always waits the
    /// window out; checks with [`find_first`](Self::find_first) each tick so
    /// the cursor is undisturbed for later assertions.
    pub fn not_expect_event<P>(&self, pred: P, timeout: Duration) -> Result<(), StreamError>
    where
        P: Fn(&Event) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.find_first(&pred) {
                return Err(StreamError::UnexpectedEvent {
                    event: event.to_string(),
                    dump: self.dump(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Branch an independent cursor at the current position.
    pub fn copy(&self) -> EventStream {
        EventStream {
            log: self.log.clone(),
            cursor: self.cursor,
            poll_interval: self.poll_interval,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Textual dump of the buffered log; consumed events are starred and the
    /// cursor position is marked.
    pub fn dump(&self) -> String {
        let snapshot = self.log.snapshot();
        if snapshot.is_empty() {
            return "  (no events)".to_string();
        }
        let mut out = String::new();
        for (index, event) in snapshot.iter().enumerate() {
            let consumed = if index < self.cursor { "*" } else { " " };
            let _ = writeln!(out, " {consumed}[{index}] {event}");
        }
        let _ = write!(out, "  cursor at {}", self.cursor);
        out
    }
}

/// Event-stream assertion failures.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("no matching event within {waited:?}; buffered log:\n{dump}")]
    ExpectTimeout { waited: Duration, dump: String },

    #[error("matching event appeared inside the forbidden window: {event}\nbuffered log:\n{dump}")]
    UnexpectedEvent { event: String, dump: String },
}

impl StreamError {
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::ExpectTimeout { .. } => "expect_timeout",
            StreamError::UnexpectedEvent { .. } => "unexpected_event",
        }
    }

    /// A missing event means the producer is broken, not that the caller
    /// should ask again.
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}
