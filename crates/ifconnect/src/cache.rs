//! Last-known state values, refreshed by the demultiplexer.
//!
//! Every successfully decoded response updates this cache, so embedders can
//! read the most recent value of any previously delivered name with zero
//! latency. Entries are never evicted while a connection is up; `close`
//! clears the cache wholesale.

use std::collections::HashMap;
use std::time::Instant;

use ifconnect_core::Value;

/// A cached value together with the moment it was decoded.
#[derive(Debug, Clone)]
pub struct CachedValue {
    /// The decoded value.
    pub value: Value,
    /// Monotonic timestamp of the decode.
    pub updated: Instant,
}

/// Mapping from manifest name to the last decoded value.
#[derive(Debug, Default)]
pub struct StateCache {
    values: HashMap<String, CachedValue>,
}

impl StateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        StateCache::default()
    }

    /// Record a freshly decoded value for `name`, stamped with now.
    pub fn update(&mut self, name: &str, value: Value) {
        self.values.insert(
            name.to_string(),
            CachedValue {
                value,
                updated: Instant::now(),
            },
        );
    }

    /// The last decoded value for `name`, if any has ever been delivered.
    pub fn get(&self, name: &str) -> Option<&CachedValue> {
        self.values.get(name)
    }

    /// Discard all cached values.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of distinct names cached.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the cache holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
