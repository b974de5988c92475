// Read-serving cache regions. The cache server itself is a consumed
// capability: components talk to the `ArticleCache` trait, and the crate
// ships an in-process TTL implementation for tests and single-node use.

pub mod refresher;


use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub use refresher::{CacheRefresher, PrewarmWorker};

/// A cached payload plus its content hash, so a read path can answer
/// not-modified checks without re-serializing identical data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Serialized JSON payload.
    pub body: String,
    /// SHA-256 of the body, hex encoded.
    pub etag: String,
}

impl CacheEntry {
    #[inline]
    pub fn new(body: String) -> Self {
        let etag = content_etag(&body);
        Self { body, etag }
    }
}

/// Hex SHA-256 digest used as the entry's content tag.
#[inline]
pub fn content_etag(body: &str) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(body.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Key-value cache capability: set-with-TTL, get, exists, and
/// pattern-scan-and-delete. Implementations must be cheap to clone behind
/// an `Arc` and safe to call from the pre-warm worker task.
pub trait ArticleCache: Send + Sync {
    fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> bool;
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn exists(&self, key: &str) -> bool;
    /// Delete keys matching `pattern`; a trailing `*` matches any suffix.
    fn clear_pattern(&self, pattern: &str) -> usize;
}

/// Full list of the day's items, content stripped. Overwritten on every
/// successful ingestion for the current date.
#[inline]
pub fn today_key() -> &'static str {
    "items:today"
}

/// One pagination window; `before_id` None is the head of the feed.
#[inline]
pub fn page_key(before_id: Option<i64>, limit: i64) -> String {
    match before_id {
        Some(before_id) => format!("items:page:{before_id}:{limit}"),
        None => format!("items:page:start:{limit}"),
    }
}

#[inline]
pub fn detail_key(id: i64) -> String {
    format!("items:detail:{id}")
}

#[derive(Debug)]
struct StoredEntry {
    entry: CacheEntry,
    expires_at: Instant,
}

/// In-process TTL cache. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArticleCache for MemoryCache {
    #[inline]
    fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        entries.insert(
            key.to_string(),
            StoredEntry {
                entry,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    #[inline]
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock().ok()?;
        if let Some(stored) = entries.get(key) {
            if stored.expires_at > Instant::now() {
                return Some(stored.entry.clone());
            }
            entries.remove(key);
        }
        None
    }

    #[inline]
    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[inline]
    fn clear_pattern(&self, pattern: &str) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        if let Some(prefix) = pattern.strip_suffix('*') {
            entries.retain(|key, _| !key.starts_with(prefix));
        } else {
            entries.remove(pattern);
        }
        before - entries.len()
    }
}
