//! # Stream Trait Seams
//!
//! The cache sits between two stream shapes: the backend stream it consumes
//! and the materializer it hands out.
//!
//! ```text
//!   ┌──────────────────────┐   open(key)   ┌───────────────────────────┐
//!   │   QuerySource<V>     │ ────────────► │   BackendStream<V>        │
//!   │                      │               │                           │
//!   │  open(&str)          │               │  materialize() → Option<V>│
//!   └──────────────────────┘               │  close()                  │
//!                                          │  error() → Option<Err>    │
//!                                          └─────────────┬─────────────┘
//!                                                        │ owned by
//!                                                        ▼
//!                                          ┌───────────────────────────┐
//!                                          │   Multiplexer<V>          │
//!                                          │   (one pull in flight)    │
//!                                          └─────────────┬─────────────┘
//!                                                        │ many
//!                                                        ▼
//!                                          ┌───────────────────────────┐
//!                                          │   Materializer<V>         │
//!                                          │   (ClientHandle)          │
//!                                          │                           │
//!                                          │  materialize() → Option<Arc<V>>
//!                                          │  reset() / close()        │
//!                                          │  error()                  │
//!                                          └───────────────────────────┘
//! ```
//!
//! ## Trait Summary
//!
//! | Trait              | Side      | Purpose                                   |
//! |--------------------|-----------|-------------------------------------------|
//! | `BackendStream`    | consumed  | Raw values from query execution           |
//! | `QuerySource`      | consumed  | Opens a backend stream for a query key    |
//! | `Materializer`     | exposed   | Per-consumer cursor over a cached stream  |
//!
//! `BackendStream::materialize` returning `None` is terminal; the cache then
//! calls `error()` exactly once to tell clean exhaustion from failure.

use std::sync::Arc;

use crate::error::{BackendError, CacheError};

/// A raw value stream produced by executing a query against the backend.
///
/// The multiplexer moves the stream onto a pull worker thread for every
/// call to `materialize`, so implementations must be `Send`.
pub trait BackendStream<V>: Send {
    /// Produces the next value, or `None` when the stream is finished or
    /// failed.
    fn materialize(&mut self) -> Option<V>;

    /// Releases backend resources. Called once: right after the stream
    /// reports `None`, or at multiplexer shutdown if it never did.
    fn close(&mut self);

    /// The failure behind the last `None`, if any.
    fn error(&self) -> Option<BackendError>;
}

/// Opens backend streams for query keys on cache misses.
pub trait QuerySource<V>: Send + Sync {
    fn open(&self, key: &str) -> Result<Box<dyn BackendStream<V>>, BackendError>;
}

impl<V, F> QuerySource<V> for F
where
    F: Fn(&str) -> Result<Box<dyn BackendStream<V>>, BackendError> + Send + Sync,
{
    fn open(&self, key: &str) -> Result<Box<dyn BackendStream<V>>, BackendError> {
        self(key)
    }
}

/// Consumer-facing value source over a cached query result.
///
/// Errors surface only through reading: `materialize` returns `None` and
/// `error` reports why.
pub trait Materializer<V> {
    /// Returns the next value, or `None` at end of stream or on error.
    fn materialize(&mut self) -> Option<Arc<V>>;

    /// Rewinds to the first value.
    fn reset(&mut self) -> Result<(), CacheError>;

    /// Releases the consumer's interest; returns the last error observed.
    fn close(&mut self) -> Result<(), CacheError>;

    /// The last error observed, if any.
    fn error(&self) -> Option<CacheError>;
}

/// Adapts any iterator of `Result<V, BackendError>` into a [`BackendStream`].
///
/// The first `Err` ends the stream and becomes its sticky error.
///
/// ```
/// use streamcache::error::BackendError;
/// use streamcache::traits::{BackendStream, IterStream};
///
/// let mut stream = IterStream::new(vec![Ok::<_, BackendError>(1), Ok(2)]);
/// assert_eq!(stream.materialize(), Some(1));
/// assert_eq!(stream.materialize(), Some(2));
/// assert_eq!(stream.materialize(), None);
/// assert!(stream.error().is_none());
/// ```
#[derive(Debug)]
pub struct IterStream<I> {
    iter: Option<I>,
    err: Option<BackendError>,
}

impl<I> IterStream<I> {
    pub fn new<T>(items: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            iter: Some(items.into_iter()),
            err: None,
        }
    }
}

impl<V, I> BackendStream<V> for IterStream<I>
where
    I: Iterator<Item = Result<V, BackendError>> + Send,
{
    fn materialize(&mut self) -> Option<V> {
        match self.iter.as_mut()?.next() {
            Some(Ok(value)) => Some(value),
            Some(Err(err)) => {
                self.err = Some(err);
                self.iter = None;
                None
            },
            None => {
                self.iter = None;
                None
            },
        }
    }

    fn close(&mut self) {
        self.iter = None;
    }

    fn error(&self) -> Option<BackendError> {
        self.err.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iter_stream_error_is_sticky() {
        let mut stream = IterStream::new(vec![
            Ok(1),
            Err(BackendError::msg("disk on fire")),
            Ok(3),
        ]);
        assert_eq!(stream.materialize(), Some(1));
        assert_eq!(stream.materialize(), None);
        assert_eq!(stream.materialize(), None);
        let err = stream.error().unwrap();
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn closure_is_a_query_source() {
        let source = |key: &str| -> Result<Box<dyn BackendStream<String>>, BackendError> {
            let key = key.to_owned();
            Ok(Box::new(IterStream::new(vec![Ok::<_, BackendError>(key)])))
        };
        let mut stream = source.open("g.V()").unwrap();
        assert_eq!(stream.materialize().as_deref(), Some("g.V()"));
        assert_eq!(stream.materialize(), None);
    }

    #[test]
    fn closed_iter_stream_yields_nothing() {
        let mut stream = IterStream::new(vec![Ok::<_, BackendError>(1), Ok(2)]);
        BackendStream::<i32>::close(&mut stream);
        assert_eq!(stream.materialize(), None);
    }
}
