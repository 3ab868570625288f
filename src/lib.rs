//! streamcache: an adaptive CART cache that shares lazily materialized query
//! streams among many independent readers.
//!
//! A [`CacheStore`] maps query keys to [`Multiplexer`]s. Each multiplexer owns
//! one backend stream and pulls from it at most once per value, no matter how
//! many [`ClientHandle`]s read it or in what order they arrive. Coordinators
//! and backend pulls run on a fixed-size [`Executor`].
//!
//! See `DESIGN.md` for internal architecture and invariants.

pub mod builder;
pub mod clock;
pub mod config;
pub mod ds;
pub mod error;
pub mod executor;
pub mod handle;
pub mod metrics;
pub mod multiplexer;
pub mod policy;
pub mod prelude;
pub mod store;
pub mod traits;

pub use crate::builder::CacheBuilder;
pub use crate::config::{SizeBudget, SizeSpec, parse_size_bytes};
pub use crate::error::{BackendError, BuildError, CacheError, ConfigError, InvariantError};
pub use crate::executor::Executor;
pub use crate::handle::{ClientHandle, HaltSwitch};
pub use crate::metrics::snapshot::CacheMetricsSnapshot;
pub use crate::multiplexer::Multiplexer;
pub use crate::store::CacheStore;
