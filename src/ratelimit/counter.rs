//! Per-client request counters for a single window.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Request counts for every client seen in one window.
///
/// The table is designed to be shared across tasks. Increments go through the
/// map's per-shard entry API and atomic arithmetic, so concurrent increments
/// for the same client are never lost.
#[derive(Debug, Default)]
pub struct CounterTable {
    /// Request count indexed by client identifier
    entries: DashMap<String, AtomicU64>,
}

impl CounterTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the count for a client, treating an absent entry as zero.
    pub fn count(&self, client_id: &str) -> u64 {
        self.entries
            .get(client_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Increment the count for a client and return the new value.
    ///
    /// The entry is created at 1 if the client has not been seen yet.
    pub fn increment(&self, client_id: &str) -> u64 {
        // Fast path: the entry exists, only a shard read lock is needed.
        if let Some(counter) = self.entries.get(client_id) {
            return counter.fetch_add(1, Ordering::SeqCst) + 1;
        }

        self.entries
            .entry(client_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    /// Number of distinct clients in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no client has been counted yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
