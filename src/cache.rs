//! Content-addressed reuse of summaries and embeddings.
//!
//! Entries are keyed by document id plus a SHA-256 digest of the page range
//! and the exact capability input, so a re-ingested document only pays for
//! the nodes whose input changed. Only successful results are cached.

use crate::tree::PageRange;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Key of one cached capability result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub document_id: String,
    pub digest: String,
}

impl CacheKey {
    pub fn new(document_id: &str, range: PageRange, input: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(range.start.to_le_bytes());
        hasher.update(range.end.to_le_bytes());
        hasher.update(input.as_bytes());
        Self {
            document_id: document_id.to_string(),
            digest: hex::encode(hasher.finalize()),
        }
    }
}

/// In-memory summary and embedding cache shared across ingestions.
#[derive(Debug, Default)]
pub struct ContentCache {
    summaries: RwLock<HashMap<CacheKey, String>>,
    embeddings: RwLock<HashMap<CacheKey, Vec<f32>>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self, key: &CacheKey) -> Option<String> {
        read(&self.summaries).get(key).cloned()
    }

    pub fn put_summary(&self, key: CacheKey, summary: String) {
        write(&self.summaries).insert(key, summary);
    }

    pub fn embedding(&self, key: &CacheKey) -> Option<Vec<f32>> {
        read(&self.embeddings).get(key).cloned()
    }

    pub fn put_embedding(&self, key: CacheKey, embedding: Vec<f32>) {
        write(&self.embeddings).insert(key, embedding);
    }

    /// Drop every entry belonging to one document.
    pub fn forget_document(&self, document_id: &str) {
        write(&self.summaries).retain(|k, _| k.document_id != document_id);
        write(&self.embeddings).retain(|k, _| k.document_id != document_id);
    }

    /// Number of cached summaries and embeddings.
    pub fn entry_counts(&self) -> (usize, usize) {
        (read(&self.summaries).len(), read(&self.embeddings).len())
    }
}

// A panic while holding the lock leaves a map that is still structurally valid.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
