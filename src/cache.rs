use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

// Cache entry with timestamp
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub response: String,
    pub cached_at: Instant,
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// Cache key: two independent hashes joined, so moving text across the
// prompt / system prompt boundary always gives a different key
pub fn make_cache_key(prompt: &str, system_prompt: &str) -> String {
    format!("{}:{}", sha256_hex(prompt), sha256_hex(system_prompt))
}

/// Bounded response cache.
///
/// Eviction is by insertion order (oldest inserted key first), not by access.
/// Expired entries are treated as absent on read and are never swept.
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>, // insertion order, front = oldest
    max_size: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
            ttl,
        }
    }

    // Live entry only (age < ttl)
    pub fn get(&self, key: &str, now: Instant) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.cached_at) < self.ttl)
            .map(|entry| entry.response.as_str())
    }

    /// Store a response. A key that is already present moves to the back of
    /// the eviction order.
    pub fn insert(&mut self, key: String, response: String, now: Instant) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else {
            while self.entries.len() >= self.max_size {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                response,
                cached_at: now,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
