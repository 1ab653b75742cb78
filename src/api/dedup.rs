//! Dual-hook dedup: the same logical hook event can legitimately arrive
//! twice within a short window (an agent retries a webhook POST, or two
//! hook scripts both fire for the same tool call). The second delivery with
//! the same dedup key is silently dropped rather than double-processed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEDUP_WINDOW: Duration = Duration::from_secs(10);

pub struct DedupCache {
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `key` has not been seen within the dedup window
    /// (the caller should process the event) and records it. Returns
    /// `false` if it's a repeat (the caller should drop it). Also sweeps
    /// expired entries so the map doesn't grow unbounded.
    pub fn check_and_record(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().expect("dedup cache mutex poisoned");
        seen.retain(|_, seen_at| now.duration_since(*seen_at) < DEDUP_WINDOW);
        if seen.contains_key(key) {
            return false;
        }
        seen.insert(key.to_string(), now);
        true
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_delivery_of_same_key_is_dropped() {
        let cache = DedupCache::new();
        assert!(cache.check_and_record("batch-1"));
        assert!(!cache.check_and_record("batch-1"));
    }

    #[test]
    fn distinct_keys_both_proceed() {
        let cache = DedupCache::new();
        assert!(cache.check_and_record("batch-1"));
        assert!(cache.check_and_record("batch-2"));
    }
}
