//! Per-query request multiplexer.
//!
//! One multiplexer exists per cached query. It owns the backend stream and a
//! growing view of the values pulled from it, and serves index-based reads
//! for any number of [`ClientHandle`]s.
//!
//! ## Architecture
//!
//! ```text
//!   ClientHandle ──┐
//!   ClientHandle ──┼── Ask{index, reply} ──►  ┌──────────────────────────────┐
//!   ClientHandle ──┘   Attach / Detach        │  mailbox                     │
//!                                             │    │ drained by a dispatcher │
//!   CacheStore ─── Opened / Retire / ──────►  │    ▼                         │
//!                  Shutdown                   │  coordinator                 │
//!                                             │    view: Vec<Arc<V>>         │
//!                                             │    waiters: [reply, ...]     │
//!                                             │    terminal: End | Failed    │
//!                                             └───────┬──────────────▲───────┘
//!                                                     │ Job(stream)  │ Pulled{stream,
//!                                                     ▼              │   value, error}
//!                                             ┌──────────────────────┴───────┐
//!                                             │  pull worker (shared pool)   │
//!                                             │  stream.materialize()        │
//!                                             └──────────────────────────────┘
//! ```
//!
//! The coordinator is a task on the store's [`Executor`], not a thread of its
//! own. Only one dispatcher drains a given mailbox at a time, so the
//! coordinator is the single writer of the view.
//!
//! ## Ask protocol
//!
//! | Request               | Answer                                            |
//! |-----------------------|---------------------------------------------------|
//! | `index < len(view)`   | `view[index]`, immediately                        |
//! | `index == len(view)`  | wait; the first waiter starts the one pull        |
//! | stream ended / failed | the terminal answer, for any index ≥ `len(view)`  |
//! | `index > len(view)`   | [`CacheError::OutOfOrderRead`]                    |
//! | after shutdown        | [`CacheError::MultiplexerClosed`]                 |
//!
//! The coordinator never touches the backend itself. The stream moves onto a
//! pull worker and comes back with the result, so at most one backend call is
//! ever in flight and asks for materialized slots are served during a slow
//! pull.
//!
//! ## Lifecycle
//!
//! The store starts a multiplexer before its stream exists and opens the
//! backend after releasing its lock; asks wait until the stream arrives. The
//! coordinator finishes once it has been retired by the store and the last
//! handle has detached, or once it has been shut down. An in-flight pull is
//! always allowed to return so the stream can be closed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{BackendError, CacheError};
use crate::executor::{Executor, Task};
use crate::handle::ClientHandle;
use crate::traits::BackendStream;

/// What a reader gets back for one index: a value, end of stream, or an
/// error.
pub type Answer<V> = Result<Option<Arc<V>>, CacheError>;

/// Messages a coordinator handles before yielding its dispatcher.
const MAILBOX_BATCH: usize = 64;

/// Outcome of opening a backend stream.
pub type OpenResult<V> = Result<Box<dyn BackendStream<V>>, BackendError>;

pub(crate) enum Message<V> {
    Ask {
        index: usize,
        reply: Sender<Answer<V>>,
    },
    Opened(OpenResult<V>),
    /// `None` when the pull panicked and took the stream with it.
    Pulled(Option<Pulled<V>>),
    Attach,
    Detach,
    Retire,
    Shutdown,
}

pub(crate) struct Pulled<V> {
    stream: Box<dyn BackendStream<V>>,
    value: Option<V>,
    error: Option<BackendError>,
}

#[derive(Clone)]
enum Terminal {
    End,
    Failed(BackendError),
}

impl Terminal {
    fn answer<V>(&self) -> Answer<V> {
        match self {
            Terminal::End => Ok(None),
            Terminal::Failed(err) => Err(CacheError::Backend(err.clone())),
        }
    }
}

/// Where the backend stream is.
enum Backend<V> {
    Opening,
    Ready(Box<dyn BackendStream<V>>),
    Pulling,
    Released,
}

// ---------------------------------------------------------------------------
// MuxTask: mailbox, coordinator and the state readable without a round trip
// ---------------------------------------------------------------------------

pub(crate) struct MuxTask<V> {
    key: Arc<str>,
    tx: Sender<Message<V>>,
    rx: Receiver<Message<V>>,
    scheduled: AtomicBool,
    materialized: AtomicUsize,
    closed: AtomicBool,
    this: Weak<dyn Task>,
    executor: Executor,
    coordinator: Mutex<Coordinator<V>>,
}

impl<V> MuxTask<V> {
    fn post(&self, msg: Message<V>) {
        if self.tx.send(msg).is_ok() {
            self.schedule();
        }
    }

    fn schedule(&self) {
        if !self.scheduled.swap(true, Ordering::SeqCst)
            && let Some(task) = self.this.upgrade()
        {
            self.executor.dispatch(task);
        }
    }
}

impl<V> Task for MuxTask<V>
where
    V: Send + Sync + 'static,
{
    fn run(self: Arc<Self>) {
        {
            let mut coordinator = self.coordinator.lock();
            for _ in 0..MAILBOX_BATCH {
                let Ok(msg) = self.rx.try_recv() else {
                    break;
                };
                coordinator.handle(msg, &self);
            }
        }
        self.scheduled.store(false, Ordering::SeqCst);
        // A sender that saw `scheduled` still set relies on this re-check.
        if !self.rx.is_empty() {
            self.schedule();
        }
    }
}

// ---------------------------------------------------------------------------
// Link: the sending side shared by the multiplexer and its handles
// ---------------------------------------------------------------------------

pub(crate) struct Link<V> {
    task: Arc<MuxTask<V>>,
}

impl<V> Clone for Link<V> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
        }
    }
}

impl<V> Link<V> {
    pub fn key(&self) -> &str {
        &self.task.key
    }

    /// Asks for the value at `index` and blocks for the answer.
    pub fn ask(&self, index: usize) -> Answer<V> {
        if self.is_closed() {
            return Err(CacheError::MultiplexerClosed);
        }
        let (reply, answer) = channel::bounded(1);
        self.task.post(Message::Ask { index, reply });
        answer.recv().unwrap_or(Err(CacheError::MultiplexerClosed))
    }

    pub fn attach(&self) {
        self.task.post(Message::Attach);
    }

    pub fn detach(&self) {
        self.task.post(Message::Detach);
    }

    /// Hands the result of opening the backend to a multiplexer that was
    /// started without a stream.
    pub fn deliver(&self, stream: OpenResult<V>) {
        self.task.post(Message::Opened(stream));
    }

    pub fn is_closed(&self) -> bool {
        self.task.closed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Multiplexer
// ---------------------------------------------------------------------------

/// Shares one lazily pulled backend stream among many readers.
///
/// Owned by the store entry for its query. Dropping it retires it: the
/// coordinator keeps serving attached handles and finishes after the last
/// one detaches.
#[must_use]
pub struct Multiplexer<V> {
    link: Link<V>,
    retired: AtomicBool,
}

impl<V> Multiplexer<V>
where
    V: Send + Sync + 'static,
{
    /// Starts a multiplexer over the result of opening `key`.
    ///
    /// An open failure becomes the sticky error every reader sees on its
    /// first read.
    pub fn open(executor: &Executor, key: &str, stream: OpenResult<V>) -> Self {
        let mux = Self::opening(executor, key);
        mux.link.deliver(stream);
        mux
    }

    /// Starts a multiplexer whose stream is still being opened.
    ///
    /// Handles can attach and ask right away; asks for the first slot wait
    /// until the stream is delivered through the handle's link.
    pub(crate) fn opening(executor: &Executor, key: &str) -> Self {
        let key: Arc<str> = Arc::from(key);
        let (tx, rx) = channel::unbounded();
        let task = Arc::new_cyclic(|this: &Weak<MuxTask<V>>| {
            let this: Weak<dyn Task> = this.clone();
            MuxTask {
                key: Arc::clone(&key),
                tx,
                rx,
                scheduled: AtomicBool::new(false),
                materialized: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                this,
                executor: executor.clone(),
                coordinator: Mutex::new(Coordinator {
                    key,
                    view: Vec::new(),
                    waiters: Vec::new(),
                    backend: Backend::Opening,
                    terminal: None,
                    attached: 0,
                    retired: false,
                    shut_down: false,
                    finished: false,
                }),
            }
        });
        Self {
            link: Link { task },
            retired: AtomicBool::new(false),
        }
    }
}

impl<V> Multiplexer<V> {
    pub fn key(&self) -> &str {
        self.link.key()
    }

    /// Attaches a new reader positioned at the first value.
    pub fn handle(&self) -> ClientHandle<V> {
        ClientHandle::attach(self.link.clone(), 0)
    }

    /// Asks for the value at `index` directly, without a handle.
    pub fn ask(&self, index: usize) -> Answer<V> {
        self.link.ask(index)
    }

    /// Number of values pulled from the backend so far.
    pub fn materialized_len(&self) -> usize {
        self.link.task.materialized.load(Ordering::Acquire)
    }

    /// `true` once the coordinator has shut down or finished.
    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Marks the multiplexer as no longer cached. Attached handles keep
    /// reading; the coordinator finishes when the last one detaches.
    /// Idempotent.
    pub fn retire(&self) {
        if !self.retired.swap(true, Ordering::AcqRel) {
            self.link.task.post(Message::Retire);
        }
    }

    /// Tears the multiplexer down now. Pending and future asks fail with
    /// [`CacheError::MultiplexerClosed`]; values already handed out stay
    /// valid.
    pub fn shutdown(&self) {
        self.retired.store(true, Ordering::Release);
        self.link.task.post(Message::Shutdown);
    }
}

impl<V> Drop for Multiplexer<V> {
    fn drop(&mut self) {
        self.retire();
    }
}

impl<V> std::fmt::Debug for Multiplexer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("key", &self.key())
            .field("materialized", &self.materialized_len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct Coordinator<V> {
    key: Arc<str>,
    view: Vec<Arc<V>>,
    waiters: Vec<Sender<Answer<V>>>,
    backend: Backend<V>,
    terminal: Option<Terminal>,
    attached: usize,
    retired: bool,
    shut_down: bool,
    finished: bool,
}

impl<V> Coordinator<V>
where
    V: Send + Sync + 'static,
{
    fn handle(&mut self, msg: Message<V>, task: &Arc<MuxTask<V>>) {
        if self.finished {
            self.handle_late(msg);
            return;
        }
        match msg {
            Message::Ask { index, reply } => self.ask(index, reply, task),
            Message::Opened(stream) => self.opened(stream, task),
            Message::Pulled(outcome) => self.complete_pull(outcome, task),
            Message::Attach => self.attached += 1,
            Message::Detach => self.attached = self.attached.saturating_sub(1),
            Message::Retire => self.retired = true,
            Message::Shutdown => {
                self.shut_down = true;
                task.closed.store(true, Ordering::Release);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(CacheError::MultiplexerClosed));
                }
            },
        }

        let done = self.shut_down || (self.retired && self.attached == 0);
        if done && !matches!(self.backend, Backend::Pulling) {
            self.finish_task(task);
        }
    }

    /// After the coordinator finished, only returned streams need work.
    /// Dropped reply senders fail their asks with `MultiplexerClosed`.
    fn handle_late(&mut self, msg: Message<V>) {
        match msg {
            Message::Opened(Ok(mut stream)) => stream.close(),
            Message::Pulled(Some(mut pulled)) => pulled.stream.close(),
            _ => {},
        }
    }

    fn finish_task(&mut self, task: &MuxTask<V>) {
        self.finished = true;
        self.close_stream();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(CacheError::MultiplexerClosed));
        }
        task.closed.store(true, Ordering::Release);
        tracing::debug!(
            key = &*self.key,
            len = self.view.len(),
            "multiplexer shut down"
        );
    }

    fn ask(&mut self, index: usize, reply: Sender<Answer<V>>, task: &Arc<MuxTask<V>>) {
        let len = self.view.len();
        let answer = if self.shut_down {
            Err(CacheError::MultiplexerClosed)
        } else if let Some(value) = self.view.get(index) {
            Ok(Some(Arc::clone(value)))
        } else if let Some(terminal) = &self.terminal {
            terminal.answer()
        } else if index == len {
            self.waiters.push(reply);
            self.start_pull(task);
            return;
        } else {
            Err(CacheError::OutOfOrderRead {
                requested: index,
                materialized: len,
            })
        };
        let _ = reply.send(answer);
    }

    fn opened(&mut self, stream: OpenResult<V>, task: &Arc<MuxTask<V>>) {
        match stream {
            Ok(mut stream) if self.shut_down => stream.close(),
            Ok(stream) => {
                tracing::trace!(key = &*self.key, "backend stream opened");
                self.backend = Backend::Ready(stream);
                if !self.waiters.is_empty() {
                    self.start_pull(task);
                }
            },
            Err(err) => {
                tracing::warn!(key = &*self.key, error = %err, "backend stream failed to open");
                self.backend = Backend::Released;
                self.finish(Terminal::Failed(err));
            },
        }
    }

    /// Sends the stream to a pull worker unless it is busy or not open yet.
    fn start_pull(&mut self, task: &Arc<MuxTask<V>>) {
        let mut stream = match std::mem::replace(&mut self.backend, Backend::Pulling) {
            Backend::Ready(stream) => stream,
            Backend::Released => {
                self.backend = Backend::Released;
                self.finish(Terminal::Failed(BackendError::msg("backend stream is gone")));
                return;
            },
            waiting => {
                self.backend = waiting;
                return;
            },
        };

        let reporter = Arc::clone(task);
        let job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
                let value = stream.materialize();
                let error = if value.is_none() { stream.error() } else { None };
                Pulled {
                    stream,
                    value,
                    error,
                }
            }));
            reporter.post(Message::Pulled(outcome.ok()));
        });

        if task.executor.submit(job) {
            tracing::trace!(key = &*self.key, index = self.view.len(), "pull started");
        } else {
            self.backend = Backend::Released;
            self.finish(Terminal::Failed(BackendError::msg("no pull worker is running")));
        }
    }

    fn complete_pull(&mut self, outcome: Option<Pulled<V>>, task: &MuxTask<V>) {
        let Some(Pulled {
            stream,
            value,
            error,
        }) = outcome
        else {
            self.backend = Backend::Released;
            self.finish(Terminal::Failed(BackendError::msg("backend pull panicked")));
            return;
        };
        self.backend = Backend::Ready(stream);

        if self.shut_down {
            return;
        }

        match value {
            Some(value) => {
                let value = Arc::new(value);
                self.view.push(Arc::clone(&value));
                task.materialized.store(self.view.len(), Ordering::Release);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(Some(Arc::clone(&value))));
                }
            },
            None => match error {
                Some(err) => self.finish(Terminal::Failed(err)),
                None => self.finish(Terminal::End),
            },
        }
    }

    /// Records the terminal answer, tells every waiter and releases the
    /// backend.
    fn finish(&mut self, terminal: Terminal) {
        match &terminal {
            Terminal::End => {
                tracing::debug!(key = &*self.key, len = self.view.len(), "backend stream exhausted");
            },
            Terminal::Failed(err) => {
                tracing::warn!(key = &*self.key, error = %err, "backend stream failed");
            },
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(terminal.answer());
        }
        self.terminal = Some(terminal);
        self.close_stream();
    }
}

impl<V> Coordinator<V> {
    fn close_stream(&mut self) {
        if let Backend::Ready(mut stream) = std::mem::replace(&mut self.backend, Backend::Released) {
            stream.close();
        }
    }
}

impl<V> Drop for Coordinator<V> {
    fn drop(&mut self) {
        self.close_stream();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
