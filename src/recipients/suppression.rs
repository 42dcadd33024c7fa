//! TTL-bounded read-through cache over the suppression list.
//!
//! The suppression list is consulted once per tick during resolution and
//! again per address at send time, so it is cached with an explicit TTL
//! instead of hitting the store for every lookup. The cache is an owned
//! struct injected into the tick coordinator; there is no global state, and
//! eviction is an explicit call.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::store::{StoreError, SuppressionSource};
use crate::types::EmailAddress;

/// A cached copy of the suppressed-address set.
#[derive(Debug)]
pub struct SuppressionCache {
    ttl: Duration,
    fetched_at: Option<Instant>,
    set: HashSet<EmailAddress>,
}

impl SuppressionCache {
    /// Creates an empty cache with the given freshness window.
    pub fn new(ttl: Duration) -> Self {
        SuppressionCache {
            ttl,
            fetched_at: None,
            set: HashSet::new(),
        }
    }

    /// Whether the cached set is still within its TTL.
    pub fn is_fresh(&self) -> bool {
        self.fetched_at
            .map(|at| at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Returns the suppressed set, re-fetching from the source if the cache
    /// is stale or empty.
    pub async fn current<S: SuppressionSource>(
        &mut self,
        source: &S,
    ) -> Result<&HashSet<EmailAddress>, StoreError> {
        if !self.is_fresh() {
            self.set = source.suppressed_addresses().await?;
            self.fetched_at = Some(Instant::now());
        }
        Ok(&self.set)
    }

    /// Whether an address is suppressed, per the cached set.
    pub fn contains(&self, address: &EmailAddress) -> bool {
        self.set.contains(address)
    }

    /// Drops the cached set; the next read goes back to the source.
    pub fn evict(&mut self) {
        self.fetched_at = None;
        self.set.clear();
    }
}
