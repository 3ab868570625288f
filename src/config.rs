//! Byte budget and staleness configuration.
//!
//! [`SizeBudget`] holds the validated memory budget, the staleness timeout and
//! the per-entry size estimate used to turn bytes into an entry capacity for
//! the CART policy.
//!
//! ## Size strings
//!
//! ```text
//!   <float>[ ]<unit>[b|B]      unit ∈ {k, m, g, t, p} (case-insensitive)
//!   <float>[b|B]               plain bytes
//!
//!   "1GB" == "1024MB" == "1048576KB" == "1073741824" == 1_073_741_824
//!   "1.5 kb" == 1536
//! ```
//!
//! Units are binary (powers of 1024). The numeric part is parsed as a float
//! and truncated after scaling.
//!
//! ## Example
//!
//! ```
//! use streamcache::config::{SizeBudget, SizeSpec};
//!
//! let mut budget = SizeBudget::default();
//! budget.set_size("512MB").unwrap();
//! assert_eq!(budget.size_bytes(), 512 * 1024 * 1024);
//!
//! // A bad string leaves the previous budget in place.
//! assert!(budget.set_size("lots").is_err());
//! assert_eq!(budget.size_bytes(), 512 * 1024 * 1024);
//!
//! budget.set_size(SizeSpec::Bytes(4096)).unwrap();
//! assert_eq!(budget.size_bytes(), 4096);
//! ```

use std::time::Duration;

use crate::error::{ConfigError, InvariantError};

/// Default memory budget: 1 GiB.
pub const DEFAULT_SIZE_BYTES: u64 = 1 << 30;

/// Default staleness timeout for non-immutable entries.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default bytes charged per cached query against the budget.
pub const DEFAULT_ENTRY_SIZE: u64 = 64 * 1024;

/// A requested cache size: an absolute byte count or a human-readable string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeSpec {
    Bytes(u64),
    Text(String),
}

impl From<u64> for SizeSpec {
    fn from(bytes: u64) -> Self {
        SizeSpec::Bytes(bytes)
    }
}

impl From<usize> for SizeSpec {
    fn from(bytes: usize) -> Self {
        SizeSpec::Bytes(bytes as u64)
    }
}

impl From<&str> for SizeSpec {
    fn from(text: &str) -> Self {
        SizeSpec::Text(text.to_owned())
    }
}

impl From<String> for SizeSpec {
    fn from(text: String) -> Self {
        SizeSpec::Text(text)
    }
}

impl SizeSpec {
    /// Resolves to a byte count.
    pub fn to_bytes(&self) -> Result<u64, ConfigError> {
        match self {
            SizeSpec::Bytes(bytes) => Ok(*bytes),
            SizeSpec::Text(text) => parse_size_bytes(text),
        }
    }
}

/// Parses a size string such as `"1GB"`, `"1.5 kb"` or `"4096"` into bytes.
///
/// Accepts a non-negative decimal number, an optional single space, an
/// optional unit letter from `k m g t p` and an optional trailing `b`, all
/// case-insensitive. Anything else is rejected.
pub fn parse_size_bytes(text: &str) -> Result<u64, ConfigError> {
    let malformed = || ConfigError::new(format!("unable to parse size string {:?}", text));

    let number_end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, mut rest) = text.split_at(number_end);

    if !number.bytes().any(|b| b.is_ascii_digit()) || number.matches('.').count() > 1 {
        return Err(malformed());
    }

    rest = rest.strip_prefix(' ').unwrap_or(rest);

    let mut chars = rest.chars();
    let (shift, rest) = match chars.next().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (10, chars.as_str()),
        Some('m') => (20, chars.as_str()),
        Some('g') => (30, chars.as_str()),
        Some('t') => (40, chars.as_str()),
        Some('p') => (50, chars.as_str()),
        _ => (0, rest),
    };

    match rest {
        "" | "b" | "B" => {},
        _ => return Err(malformed()),
    }

    let value: f64 = number.parse().map_err(|_| malformed())?;
    let bytes = value * (1u64 << shift) as f64;

    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(ConfigError::new(format!(
            "size string {:?} overflows the byte budget",
            text
        )));
    }

    Ok(bytes as u64)
}

/// Validated byte budget and staleness policy for a cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBudget {
    size_bytes: u64,
    timeout: Duration,
    entry_size: u64,
}

impl Default for SizeBudget {
    fn default() -> Self {
        Self {
            size_bytes: DEFAULT_SIZE_BYTES,
            timeout: DEFAULT_TIMEOUT,
            entry_size: DEFAULT_ENTRY_SIZE,
        }
    }
}

impl SizeBudget {
    /// Sets the byte budget. On error the previous budget is kept.
    pub fn set_size(&mut self, spec: impl Into<SizeSpec>) -> Result<(), ConfigError> {
        self.size_bytes = spec.into().to_bytes()?;
        Ok(())
    }

    /// Sets the staleness timeout; `Duration::ZERO` disables expiry.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sets the bytes charged per cached query.
    pub fn set_entry_size(&mut self, spec: impl Into<SizeSpec>) -> Result<(), ConfigError> {
        let bytes = spec.into().to_bytes()?;
        if bytes == 0 {
            return Err(ConfigError::new("entry size estimate must be > 0"));
        }
        self.entry_size = bytes;
        Ok(())
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn entry_size(&self) -> u64 {
        self.entry_size
    }

    /// Number of live entries the budget admits.
    ///
    /// Fails when the budget cannot hold a single entry.
    pub fn entry_capacity(&self) -> Result<usize, InvariantError> {
        let entries = self.size_bytes / self.entry_size;
        if entries == 0 {
            return Err(InvariantError::new(format!(
                "byte budget {} cannot hold one entry of {} bytes",
                self.size_bytes, self.entry_size
            )));
        }
        Ok(usize::try_from(entries).unwrap_or(usize::MAX))
    }

    /// Returns `true` if an entry of the given age has outlived the timeout.
    #[inline]
    pub fn is_stale(&self, age: Duration) -> bool {
        !self.timeout.is_zero() && age >= self.timeout
    }
}
