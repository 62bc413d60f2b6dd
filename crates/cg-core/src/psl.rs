//! Public Suffix List (PSL) utilities for eTLD+1 extraction
//!
//! This module provides eTLD+1 extraction with LRU caching. A full PSL can be
//! loaded at runtime with [`init_psl`]; until then a heuristic covering the
//! common two-part suffixes is used.
//!
//! # Examples
//!
//! ```
//! use cg_core::psl::get_etld1;
//!
//! assert_eq!(get_etld1("sub.example.com"), "example.com");
//! assert_eq!(get_etld1("sub.example.co.uk"), "example.co.uk");
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use publicsuffix::{List, Psl};

// =============================================================================
// LRU Cache
// =============================================================================

/// Simple fixed-size cache for eTLD+1 lookups.
/// Uses a basic LRU strategy with a hashmap + vec.
pub struct LruCache {
    capacity: usize,
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl LruCache {
    /// Create a new LRU cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Get a value without touching its recency. Works under a shared lock.
    pub fn peek(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    /// Get a value from the cache.
    pub fn get(&mut self, key: &str) -> Option<&str> {
        if self.entries.contains_key(key) {
            // Move to back (most recently used)
            self.order.retain(|k| k != key);
            self.order.push_back(key.to_string());
            self.entries.get(key).map(|s| s.as_str())
        } else {
            None
        }
    }

    /// Insert a value into the cache.
    pub fn insert(&mut self, key: String, value: String) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

// =============================================================================
// Global PSL State
// =============================================================================

const CACHE_CAPACITY: usize = 4096;

static PSL_LIST: RwLock<Option<List>> = RwLock::new(None);

static ETLD1_CACHE: RwLock<Option<LruCache>> = RwLock::new(None);

/// Initialize the PSL from the text of a `public_suffix_list.dat` file.
pub fn init_psl(list_text: &str) -> Result<(), publicsuffix::Error> {
    let list: List = list_text.parse()?;
    if let Ok(mut slot) = PSL_LIST.write() {
        *slot = Some(list);
    }
    // Heuristic results cached before the list arrived are stale now
    if let Ok(mut cache) = ETLD1_CACHE.write() {
        *cache = Some(LruCache::new(CACHE_CAPACITY));
    }
    log::info!("public suffix list loaded");
    Ok(())
}

/// Check if a full PSL is loaded.
pub fn is_psl_initialized() -> bool {
    PSL_LIST.read().map(|list| list.is_some()).unwrap_or(false)
}

// =============================================================================
// eTLD+1 Extraction
// =============================================================================

/// Common two-part TLDs for fallback.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Get the eTLD+1 (registrable domain) for a hostname.
///
/// If the PSL is not loaded, falls back to a simple heuristic. Cache hits
/// only take the read lock, so hot hosts age out in insertion order.
pub fn get_etld1(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    let host = host.trim_end_matches('.');

    if let Ok(guard) = ETLD1_CACHE.read() {
        if let Some(cached) = guard.as_ref().and_then(|cache| cache.peek(host)) {
            return cached.to_string();
        }
    }

    let result = compute_etld1(host);

    if let Ok(mut guard) = ETLD1_CACHE.write() {
        let cache = guard.get_or_insert_with(|| LruCache::new(CACHE_CAPACITY));
        cache.insert(host.to_string(), result.clone());
    }

    result
}

/// Compute eTLD+1 without caching.
fn compute_etld1(host: &str) -> String {
    if let Ok(guard) = PSL_LIST.read() {
        if let Some(list) = guard.as_ref() {
            if let Some(domain) = list.domain(host.as_bytes()) {
                if let Ok(domain) = std::str::from_utf8(domain.as_bytes()) {
                    return domain.to_string();
                }
            }
            // The host is itself a public suffix
            return host.to_string();
        }
    }

    let labels: Vec<&str> = host.split('.').collect();
    fallback_etld1(&labels)
}

/// Fallback eTLD+1 heuristic.
fn fallback_etld1(labels: &[&str]) -> String {
    let n = labels.len();
    if n <= 2 {
        return labels.join(".");
    }

    let last_two = format!("{}.{}", labels[n - 2], labels[n - 1]);
    if COMMON_TWO_PART_TLDS.contains(&last_two.as_str()) {
        return labels[n - 3..].join(".");
    }

    labels[n - 2..].join(".")
}

/// Check if two hosts share the same eTLD+1.
pub fn is_same_site(host1: &str, host2: &str) -> bool {
    get_etld1(host1) == get_etld1(host2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_etld1_simple() {
        assert_eq!(fallback_etld1(&["example", "com"]), "example.com");
        assert_eq!(fallback_etld1(&["sub", "example", "com"]), "example.com");
        assert_eq!(fallback_etld1(&["localhost"]), "localhost");
    }

    #[test]
    fn test_fallback_etld1_two_part() {
        assert_eq!(fallback_etld1(&["sub", "example", "co", "uk"]), "example.co.uk");
        assert_eq!(fallback_etld1(&["example", "co", "uk"]), "example.co.uk");
    }

    #[test]
    fn test_get_etld1_normalizes() {
        assert_eq!(get_etld1("Ads.Track.BIZ."), "track.biz");
        assert!(is_same_site("a.example.com", "b.example.com"));
        assert!(!is_same_site("example.com", "example.org"));
    }

    #[test]
    fn test_lru_cache_evicts_oldest() {
        let mut cache = LruCache::new(2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        assert_eq!(cache.get("a"), Some("1"));
        cache.insert("c".into(), "3".into());
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1"));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_cache_peek_keeps_order() {
        let mut cache = LruCache::new(2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        assert_eq!(cache.peek("a"), Some("1"));
        assert_eq!(cache.peek("z"), None);
        cache.insert("c".into(), "3".into());
        assert_eq!(cache.peek("a"), None);
        assert_eq!(cache.peek("b"), Some("2"));

        cache.insert("b".into(), "4".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("b"), Some("4"));
    }

    #[test]
    fn test_get_etld1_cached_hit() {
        assert_eq!(get_etld1("cdn.cached-site.co.uk"), "cached-site.co.uk");
        assert_eq!(get_etld1("cdn.cached-site.co.uk"), "cached-site.co.uk");
        let cached = ETLD1_CACHE
            .read()
            .unwrap()
            .as_ref()
            .and_then(|cache| cache.peek("cdn.cached-site.co.uk").map(str::to_string));
        assert_eq!(cached.as_deref(), Some("cached-site.co.uk"));
    }
}
