//! LRU cache for query embeddings.
//!
//! Entries are keyed by a hash of the text (SHA-256 by default) so the cache
//! never holds the query text itself. Capacity `0` disables caching.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chunking::content_hash;

/// Derives a cache key from text.
pub type KeyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Default)]
struct LruState {
    entries: HashMap<String, (Vec<f32>, u64)>,
    /// Last-use tick to key; the first entry is the least recently used.
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl LruState {
    fn touch(&mut self, key: &str) -> Option<Vec<f32>> {
        self.tick += 1;
        let tick = self.tick;
        let (vector, last_used) = self.entries.get_mut(key)?;
        self.recency.remove(&*last_used);
        *last_used = tick;
        self.recency.insert(tick, key.to_string());
        Some(vector.clone())
    }
}

/// Bounded least-recently-used map from text hash to embedding vector.
pub struct EmbeddingCache {
    capacity: usize,
    key_fn: KeyFn,
    state: Mutex<LruState>,
}

impl fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingCache").field("capacity", &self.capacity).finish_non_exhaustive()
    }
}

impl EmbeddingCache {
    /// Create a cache keyed by the SHA-256 of the text.
    pub fn new(capacity: usize) -> Self {
        Self::with_key_fn(capacity, Arc::new(content_hash))
    }

    /// Create a cache with a custom key derivation.
    pub fn with_key_fn(capacity: usize, key_fn: KeyFn) -> Self {
        Self { capacity, key_fn, state: Mutex::new(LruState::default()) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `false` when the capacity is zero.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// The key under which `text` is stored.
    pub fn key_for(&self, text: &str) -> String {
        (self.key_fn)(text)
    }

    /// Look up `text`, marking the entry as most recently used.
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        if !self.is_enabled() {
            return None;
        }
        let key = self.key_for(text);
        self.state.lock().await.touch(&key)
    }

    /// Store the embedding of `text`, evicting the least recently used entry when full.
    pub async fn insert(&self, text: &str, vector: Vec<f32>) {
        if !self.is_enabled() {
            return;
        }
        let key = self.key_for(text);
        let mut state = self.state.lock().await;
        state.tick += 1;
        let tick = state.tick;

        if let Some((_, last_used)) = state.entries.insert(key.clone(), (vector, tick)) {
            state.recency.remove(&last_used);
        } else if state.entries.len() > self.capacity {
            if let Some((_, oldest)) = state.recency.pop_first() {
                state.entries.remove(&oldest);
            }
        }
        state.recency.insert(tick, key);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.recency.clear();
    }
}
