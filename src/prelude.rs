pub use crate::builder::CacheBuilder;
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{SizeBudget, SizeSpec};
pub use crate::error::{BackendError, BuildError, CacheError, ConfigError, InvariantError};
pub use crate::executor::{DEFAULT_PULL_WORKERS, Executor};
pub use crate::handle::{ClientHandle, HaltSwitch};
pub use crate::metrics::{CacheMetricsSnapshot, ListLens};
pub use crate::multiplexer::{Answer, Multiplexer, OpenResult};
pub use crate::store::CacheStore;
pub use crate::traits::{BackendStream, IterStream, Materializer, QuerySource};
