//! Keyed storage of cached frames per target slot

use std::collections::HashMap;

use crate::frame::Frame;
use crate::types::{TargetIdentity, Timestamp};

/// Cached result of one target slot
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Signature of the query that produced `frames`
    pub signature: String,
    /// Frames trimmed to the last served window
    pub frames: Vec<Frame>,
    /// End of the last window merged into this entry
    pub prev_to: Timestamp,
}

impl CacheEntry {
    /// Total rows across all cached frames
    pub fn rows(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }
}

/// Map from target identity to its cache entry
///
/// Entries are created by the merger, dropped by the planner on
/// invalidation, and never expire on their own.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<TargetIdentity, CacheEntry>,
}

impl CacheStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry
    pub fn get(&self, identity: &TargetIdentity) -> Option<&CacheEntry> {
        self.entries.get(identity)
    }

    /// Take an entry out of the store
    pub fn remove(&mut self, identity: &TargetIdentity) -> Option<CacheEntry> {
        self.entries.remove(identity)
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, identity: TargetIdentity, entry: CacheEntry) {
        self.entries.insert(identity, entry);
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached targets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows held across all entries
    pub fn total_rows(&self) -> usize {
        self.entries.values().map(CacheEntry::rows).sum()
    }
}
