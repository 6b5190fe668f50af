//! Connection directory backends.
//!
//! - [`MemoryDirectory`]: both indexes under one lock, for tests and
//!   single-process deployments
//! - [`RedbDirectory`]: forward table and reverse index in an embedded
//!   `redb` file, written in one transaction (feature `redb`)

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb;

pub use memory::MemoryDirectory;
#[cfg(feature = "redb")]
pub use self::redb::RedbDirectory;

use std::time::Duration;

/// Expiry instant for a record written at `now_ms` with the given TTL.
pub(crate) fn expiry_after(now_ms: u64, ttl: Duration) -> u64 {
    now_ms.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}
