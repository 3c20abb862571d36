//! Identity allocation.
//!
//! Definitions and shared-object instances draw their identities from one
//! monotonically increasing counter, so an id is never handed out twice.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Stable integer identity of a definition or shared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(u64);

impl Identity {
    /// Wrap a raw id, e.g. one read from an identity table.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of fresh identities.
#[derive(Debug)]
pub struct IdentityAllocator {
    next: AtomicU64,
    /// Highest id handed out by `allocate`, `0` if none.
    issued: AtomicU64,
}

impl IdentityAllocator {
    /// Create an allocator whose first id is `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            issued: AtomicU64::new(0),
        }
    }

    /// Hand out the next unused identity.
    pub fn allocate(&self) -> Identity {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.issued.fetch_max(id, Ordering::Relaxed);
        Identity(id)
    }

    /// Highest identity handed out so far, if any.
    ///
    /// Unlike [`peek`](Self::peek) this ignores ids skipped by
    /// [`advance_past`](Self::advance_past).
    #[must_use]
    pub fn issued(&self) -> Option<Identity> {
        match self.issued.load(Ordering::Relaxed) {
            0 => None,
            id => Some(Identity(id)),
        }
    }

    /// Make sure every future identity is greater than `max`.
    ///
    /// Never moves the counter backwards.
    pub fn advance_past(&self, max: u64) {
        self.next
            .fetch_max(max.saturating_add(1), Ordering::Relaxed);
    }

    /// The identity the next call to [`allocate`](Self::allocate) returns.
    #[must_use]
    pub fn peek(&self) -> Identity {
        Identity(self.next.load(Ordering::Relaxed))
    }
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
