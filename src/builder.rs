//! Builder for [`CacheStore`] instances.
//!
//! Collects the byte budget, staleness timeout, per-entry size estimate,
//! clock and executor sizing, validates them, and builds a store over a
//! [`QuerySource`]. Setters take `&mut self`, so a rejected value leaves the
//! builder as it was.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use streamcache::builder::CacheBuilder;
//! use streamcache::error::BackendError;
//! use streamcache::traits::{BackendStream, IterStream};
//!
//! let store = CacheBuilder::new()
//!     .size("64MB")
//!     .unwrap()
//!     .entry_size("1MB")
//!     .unwrap()
//!     .timeout(Duration::from_secs(30))
//!     .build(|_: &str| -> Result<Box<dyn BackendStream<u64>>, BackendError> {
//!         Ok(Box::new(IterStream::new(vec![Ok::<u64, BackendError>(1), Ok(2)])))
//!     })
//!     .unwrap();
//! assert_eq!(store.capacity(), 64);
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::{SizeBudget, SizeSpec};
use crate::error::{BuildError, ConfigError};
use crate::executor::{self, DEFAULT_PULL_WORKERS, Executor};
use crate::store::CacheStore;
use crate::traits::QuerySource;

/// Builder for creating cache stores.
#[must_use]
pub struct CacheBuilder {
    budget: SizeBudget,
    clock: Arc<dyn Clock>,
    dispatchers: usize,
    pull_workers: usize,
    executor: Option<Executor>,
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBuilder {
    /// Creates a builder with a 1 GiB budget, a 5 minute timeout, a
    /// 64 KiB per-entry estimate and a default-sized executor.
    pub fn new() -> Self {
        Self {
            budget: SizeBudget::default(),
            clock: Arc::new(SystemClock),
            dispatchers: executor::default_dispatchers(),
            pull_workers: DEFAULT_PULL_WORKERS,
            executor: None,
        }
    }

    /// Sets the byte budget from a byte count or a size string such as
    /// `"512MB"`.
    pub fn size(&mut self, size: impl Into<SizeSpec>) -> Result<&mut Self, ConfigError> {
        self.budget.set_size(size)?;
        Ok(self)
    }

    /// Sets the staleness timeout for non-immutable entries. Zero disables
    /// expiry.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.budget.set_timeout(timeout);
        self
    }

    /// Sets the bytes charged against the budget per cached query.
    pub fn entry_size(&mut self, size: impl Into<SizeSpec>) -> Result<&mut Self, ConfigError> {
        self.budget.set_entry_size(size)?;
        Ok(self)
    }

    /// Replaces the time source used for entry ages.
    pub fn clock(&mut self, clock: impl Clock + 'static) -> &mut Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Threads that run multiplexer coordinators.
    pub fn dispatchers(&mut self, n: usize) -> &mut Self {
        self.dispatchers = n;
        self
    }

    /// Backend calls that may run at once across the store.
    pub fn pull_workers(&mut self, n: usize) -> &mut Self {
        self.pull_workers = n;
        self
    }

    /// Runs the store on an existing executor instead of starting one.
    /// Overrides [`dispatchers`](Self::dispatchers) and
    /// [`pull_workers`](Self::pull_workers).
    pub fn executor(&mut self, executor: Executor) -> &mut Self {
        self.executor = Some(executor);
        self
    }

    pub fn budget(&self) -> &SizeBudget {
        &self.budget
    }

    /// Builds a store that opens backend streams through `source`.
    ///
    /// Fails when the budget cannot hold a single entry or a worker thread
    /// cannot be started.
    pub fn build<V, S>(&self, source: S) -> Result<CacheStore<V>, BuildError>
    where
        V: Send + Sync + 'static,
        S: QuerySource<V> + 'static,
    {
        // Checked before any thread starts.
        self.budget.entry_capacity()?;
        let executor = match &self.executor {
            Some(executor) => executor.clone(),
            None => Executor::new(self.dispatchers, self.pull_workers)?,
        };
        CacheStore::with_executor(source, self.budget, Arc::clone(&self.clock), executor)
    }
}

impl std::fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("budget", &self.budget)
            .field("dispatchers", &self.dispatchers)
            .field("pull_workers", &self.pull_workers)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_ENTRY_SIZE, DEFAULT_SIZE_BYTES, DEFAULT_TIMEOUT};
    use crate::error::BackendError;
    use crate::traits::{BackendStream, IterStream};

    fn source(_: &str) -> Result<Box<dyn BackendStream<u32>>, BackendError> {
        Ok(Box::new(IterStream::new(vec![Ok::<u32, BackendError>(7)])))
    }

    #[test]
    fn defaults() {
        let builder = CacheBuilder::new();
        assert_eq!(builder.budget().size_bytes(), DEFAULT_SIZE_BYTES);
        assert_eq!(builder.budget().timeout(), DEFAULT_TIMEOUT);
        assert_eq!(builder.budget().entry_size(), DEFAULT_ENTRY_SIZE);

        let store = builder.build(source).unwrap();
        assert_eq!(store.capacity(), (DEFAULT_SIZE_BYTES / DEFAULT_ENTRY_SIZE) as usize);
    }

    #[test]
    fn bad_size_string_is_a_config_error() {
        let err = CacheBuilder::new().size("bogus").unwrap_err();
        assert!(err.message().contains("bogus"));
        assert!(CacheBuilder::new().entry_size(0u64).is_err());
    }

    #[test]
    fn rejected_setting_keeps_the_builder() {
        let mut builder = CacheBuilder::new();
        builder
            .size("2MB")
            .unwrap()
            .timeout(Duration::from_secs(7));
        assert!(builder.size("two megabytes").is_err());
        assert!(builder.entry_size("").is_err());

        assert_eq!(builder.budget().size_bytes(), 2 * 1024 * 1024);
        assert_eq!(builder.budget().timeout(), Duration::from_secs(7));
        assert_eq!(builder.budget().entry_size(), DEFAULT_ENTRY_SIZE);
        assert!(builder.build(source).is_ok());
    }

    #[test]
    fn budget_too_small_for_one_entry() {
        let mut builder = CacheBuilder::new();
        builder.size(100u64).unwrap();
        let err = builder.build(source).unwrap_err();
        assert!(matches!(err, BuildError::Invariant(_)));
    }

    #[test]
    fn size_accepts_bytes_and_strings() {
        let mut a = CacheBuilder::new();
        a.size(1u64 << 30).unwrap();
        let mut b = CacheBuilder::new();
        b.size("1GB").unwrap();
        assert_eq!(a.budget(), b.budget());
    }

    #[test]
    fn executor_sizing() {
        let mut builder = CacheBuilder::new();
        builder.dispatchers(2).pull_workers(3);
        let store = builder.build(source).unwrap();
        assert_eq!(store.executor().dispatchers(), 2);
        assert_eq!(store.executor().pull_workers(), 3);

        let shared = Executor::new(1, 1).unwrap();
        builder.executor(shared);
        let first = builder.build(source).unwrap();
        let second = builder.build(source).unwrap();
        assert_eq!(first.executor().pull_workers(), 1);
        assert_eq!(second.executor().dispatchers(), 1);
    }
}
