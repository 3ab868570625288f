//! Per-consumer read cursor over a shared multiplexer.
//!
//! Every [`ClientHandle`] keeps its own cursor, its own last error and its
//! own halt switch. Closing or resetting one handle never affects another
//! handle on the same multiplexer.
//!
//! ## Example
//!
//! ```
//! use streamcache::error::BackendError;
//! use streamcache::executor::Executor;
//! use streamcache::multiplexer::Multiplexer;
//! use streamcache::traits::{IterStream, Materializer};
//!
//! let executor = Executor::new(1, 1).unwrap();
//! let stream = IterStream::new(vec![Ok::<u32, BackendError>(10), Ok(20)]);
//! let mux: Multiplexer<u32> = Multiplexer::open(&executor, "g.V().count()", Ok(Box::new(stream)));
//!
//! let mut a = mux.handle();
//! let mut b = mux.handle();
//! assert_eq!(a.materialize().as_deref(), Some(&10));
//! assert_eq!(a.materialize().as_deref(), Some(&20));
//! assert_eq!(b.materialize().as_deref(), Some(&10));
//! assert!(a.materialize().is_none());
//! assert!(a.error().is_none());
//!
//! a.close().unwrap();
//! assert_eq!(b.materialize().as_deref(), Some(&20));
//! ```

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::CacheError;
use crate::multiplexer::Link;
use crate::traits::Materializer;

// ---------------------------------------------------------------------------
// HaltSwitch
// ---------------------------------------------------------------------------

/// Pauses a handle's reads from another thread.
///
/// While halted, [`ClientHandle::materialize`](Materializer::materialize)
/// blocks until [`resume`](Self::resume) is called. Clones control the same
/// handle.
#[derive(Debug, Clone, Default)]
pub struct HaltSwitch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl HaltSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn halt(&self) {
        *self.inner.0.lock() = true;
    }

    pub fn resume(&self) {
        let (halted, cond) = &*self.inner;
        *halted.lock() = false;
        cond.notify_all();
    }

    pub fn is_halted(&self) -> bool {
        *self.inner.0.lock()
    }

    fn wait_while_halted(&self) {
        let (halted, cond) = &*self.inner;
        let mut guard = halted.lock();
        while *guard {
            cond.wait(&mut guard);
        }
    }
}

// ---------------------------------------------------------------------------
// ClientHandle
// ---------------------------------------------------------------------------

/// A reader over one cached query stream.
///
/// Obtained from [`CacheStore::request`](crate::store::CacheStore::request).
/// Reads go through the [`Materializer`] trait. Dropping the handle closes
/// it.
#[must_use]
pub struct ClientHandle<V> {
    link: Link<V>,
    cursor: usize,
    err: Option<CacheError>,
    closed: bool,
    halt: HaltSwitch,
}

impl<V> ClientHandle<V> {
    pub(crate) fn attach(link: Link<V>, cursor: usize) -> Self {
        link.attach();
        Self {
            link,
            cursor,
            err: None,
            closed: false,
            halt: HaltSwitch::new(),
        }
    }

    pub(crate) fn link(&self) -> &Link<V> {
        &self.link
    }

    /// The query key this handle reads.
    pub fn key(&self) -> &str {
        self.link.key()
    }

    /// Index of the next value `materialize` will return.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A switch that halts and resumes this handle from any thread.
    pub fn halt_switch(&self) -> HaltSwitch {
        self.halt.clone()
    }

    pub fn halt(&self) {
        self.halt.halt();
    }

    pub fn resume(&self) {
        self.halt.resume();
    }

    /// Forks a new handle on the same stream at the same position.
    ///
    /// The fork has its own error state and halt switch.
    pub fn try_clone(&self) -> Result<Self, CacheError> {
        if self.closed {
            return Err(CacheError::HandleClosed);
        }
        Ok(Self::attach(self.link.clone(), self.cursor))
    }
}

impl<V> Materializer<V> for ClientHandle<V> {
    fn materialize(&mut self) -> Option<Arc<V>> {
        if self.closed {
            self.err = Some(CacheError::HandleClosed);
            return None;
        }
        if self.err.is_some() {
            return None;
        }

        self.halt.wait_while_halted();

        match self.link.ask(self.cursor) {
            Ok(Some(value)) => {
                self.cursor += 1;
                Some(value)
            },
            Ok(None) => None,
            Err(err) => {
                self.err = Some(err);
                None
            },
        }
    }

    fn reset(&mut self) -> Result<(), CacheError> {
        if self.closed {
            return Err(CacheError::HandleClosed);
        }
        self.cursor = 0;
        self.err = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), CacheError> {
        if !self.closed {
            self.closed = true;
            self.link.detach();
        }
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn error(&self) -> Option<CacheError> {
        self.err.clone()
    }
}

impl<V> Drop for ClientHandle<V> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.link.detach();
        }
    }
}

impl<V> std::fmt::Debug for ClientHandle<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("key", &self.key())
            .field("cursor", &self.cursor)
            .field("err", &self.err)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::error::BackendError;
    use crate::executor::Executor;
    use crate::multiplexer::Multiplexer;
    use crate::traits::IterStream;

    fn executor() -> Executor {
        Executor::new(1, 1).unwrap()
    }

    fn numbers(n: u32) -> Multiplexer<u32> {
        let items: Vec<Result<u32, BackendError>> = (0..n).map(Ok).collect();
        Multiplexer::open(&executor(), "numbers", Ok(Box::new(IterStream::new(items))))
    }

    fn drain(handle: &mut ClientHandle<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(v) = handle.materialize() {
            out.push(*v);
        }
        out
    }

    #[test]
    fn handle_reads_then_resets() {
        let mux = numbers(3);
        let mut handle = mux.handle();
        assert_eq!(drain(&mut handle), vec![0, 1, 2]);
        assert_eq!(handle.position(), 3);
        assert!(handle.materialize().is_none(), "end is repeated");

        handle.reset().unwrap();
        assert_eq!(handle.position(), 0);
        assert_eq!(drain(&mut handle), vec![0, 1, 2]);
        assert!(handle.close().is_ok());
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() {
        let mux = numbers(3);
        let mut handle = mux.handle();
        handle.materialize();
        handle.close().unwrap();
        handle.close().unwrap();
        assert!(handle.is_closed());

        assert!(handle.materialize().is_none());
        assert_eq!(handle.error(), Some(CacheError::HandleClosed));
        assert_eq!(handle.reset(), Err(CacheError::HandleClosed));
        assert_eq!(handle.close(), Err(CacheError::HandleClosed));
        assert!(handle.try_clone().is_err());
    }

    #[test]
    fn closing_one_handle_leaves_others_alone() {
        let mux = numbers(4);
        let mut a = mux.handle();
        let mut b = mux.handle();
        assert_eq!(a.materialize().as_deref(), Some(&0));
        assert_eq!(b.materialize().as_deref(), Some(&0));
        assert_eq!(b.materialize().as_deref(), Some(&1));

        a.close().unwrap();
        assert_eq!(drain(&mut b), vec![2, 3]);
        assert!(b.error().is_none());
    }

    #[test]
    fn error_sticks_until_reset() {
        let items: Vec<Result<u32, BackendError>> =
            vec![Ok(1), Err(BackendError::msg("lost connection"))];
        let mux: Multiplexer<u32> =
            Multiplexer::open(&executor(), "q", Ok(Box::new(IterStream::new(items))));
        let mut handle = mux.handle();
        assert_eq!(handle.materialize().as_deref(), Some(&1));
        assert!(handle.materialize().is_none());
        let err = handle.error().unwrap();
        assert!(!err.is_usage());

        assert!(handle.materialize().is_none());
        handle.reset().unwrap();
        assert!(handle.error().is_none());
        assert_eq!(handle.materialize().as_deref(), Some(&1));
        assert!(handle.materialize().is_none());
        assert_eq!(handle.close(), Err(err));
    }

    #[test]
    fn try_clone_forks_at_cursor() {
        let mux = numbers(3);
        let mut a = mux.handle();
        a.materialize();
        let mut b = a.try_clone().unwrap();
        assert_eq!(b.position(), 1);
        assert_eq!(b.key(), "numbers");
        assert_eq!(drain(&mut b), vec![1, 2]);
        assert_eq!(drain(&mut a), vec![1, 2]);
    }

    #[test]
    fn halted_handle_waits_for_resume() {
        let mux = numbers(2);
        let mut handle = mux.handle();
        let switch = handle.halt_switch();
        switch.halt();
        assert!(handle.halt_switch().is_halted());

        let reader = thread::spawn(move || {
            let v = handle.materialize().map(|v| *v);
            (v, handle)
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());

        switch.resume();
        let (v, _handle) = reader.join().unwrap();
        assert_eq!(v, Some(0));
    }
}
