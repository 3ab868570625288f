//! Error types for the streamcache library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when cache configuration is invalid (malformed
//!   size strings, zero entry-size estimates).
//! - [`InvariantError`]: Returned when a derived policy parameter would break a
//!   store invariant (e.g. a zero entry capacity), and by debug validation.
//! - [`BuildError`]: Returned when a store cannot start: an invariant error
//!   or a worker thread that failed to spawn.
//! - [`BackendError`]: A cloneable failure reported by the backing query
//!   stream. Sticky per multiplexer.
//! - [`CacheError`]: Everything a [`ClientHandle`](crate::handle::ClientHandle)
//!   can observe while reading: backend failures and usage errors.
//!
//! ## Example Usage
//!
//! ```
//! use streamcache::config::parse_size_bytes;
//!
//! assert_eq!(parse_size_bytes("2KB").unwrap(), 2048);
//! let err = parse_size_bytes("bogus").unwrap_err();
//! assert!(err.to_string().contains("bogus"));
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by [`SizeBudget::set_size`](crate::config::SizeBudget::set_size)
/// and the [`CacheBuilder`](crate::builder::CacheBuilder) option methods.
/// Carries a human-readable description of which parameter failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when a store invariant would be violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// BuildError
// ---------------------------------------------------------------------------

/// Error returned when a store or its executor cannot be started.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The budget cannot hold a single entry.
    #[error(transparent)]
    Invariant(#[from] InvariantError),
    /// A worker thread failed to spawn.
    #[error("failed to start {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

/// Failure reported by a backend stream or query source.
///
/// Cheap to clone: one failure is fanned out to every reader waiting on the
/// slot that produced it, and to every later reader past the materialized
/// prefix.
#[derive(Clone)]
pub struct BackendError(Arc<dyn StdError + Send + Sync + 'static>);

impl BackendError {
    /// Wraps any error type.
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Creates a backend error from a plain message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self(Arc::new(MessageError(msg.into())))
    }

    /// Returns the wrapped error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BackendError")
            .field(&self.0.to_string())
            .finish()
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for BackendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl PartialEq for BackendError {
    /// Two backend errors are equal when they are the same shared failure.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Errors observed by consumers of cached streams.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    /// The backend failed, either opening the query or mid-stream.
    #[error("backend failure: {0}")]
    Backend(BackendError),

    /// A reader asked for a slot beyond the next unseen one.
    #[error("read of index {requested} skips ahead of materialized length {materialized}")]
    OutOfOrderRead { requested: usize, materialized: usize },

    /// The handle was used after `close`.
    #[error("client handle is closed")]
    HandleClosed,

    /// The multiplexer was shut down; no further values can be served.
    #[error("multiplexer for this query has shut down")]
    MultiplexerClosed,
}

impl CacheError {
    /// Returns `true` for errors caused by the caller rather than the backend.
    pub fn is_usage(&self) -> bool {
        !matches!(self, CacheError::Backend(_))
    }
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        CacheError::Backend(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
