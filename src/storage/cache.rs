//! Trimmable in-process caches
//!
//! Feature code registers its caches with the memory pressure manager, which
//! trims them during cleanup. `TransientCache` covers the two shapes the
//! runtime knows about: a route/navigation cache that can always be dropped,
//! and an inline payload cache whose large, non-critical entries go first.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// How hard to trim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimLevel {
    Standard,
    Aggressive,
}

/// What one trim removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    pub cache: String,
    pub entries_removed: usize,
    pub bytes_freed: usize,
}

/// A cache the memory manager may shrink.
pub trait Trimmable: Send + Sync {
    fn name(&self) -> &str;

    fn trim(&self, level: TrimLevel) -> TrimReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRole {
    /// Every entry is disposable
    Transient,
    /// Non-critical entries of at least `large_bytes` are released at standard
    /// level, every non-critical entry at aggressive level
    Payload { large_bytes: usize },
}

struct CacheEntry {
    bytes: Vec<u8>,
    critical: bool,
}

pub struct TransientCache {
    name: String,
    role: CacheRole,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TransientCache {
    /// Route/navigation style cache, cleared completely on any trim
    pub fn transient(name: impl Into<String>) -> Self {
        Self::with_role(name, CacheRole::Transient)
    }

    /// Inline payload cache (images and similar blobs)
    pub fn payloads(name: impl Into<String>, large_bytes: usize) -> Self {
        Self::with_role(name, CacheRole::Payload { large_bytes })
    }

    fn with_role(name: impl Into<String>, role: CacheRole) -> Self {
        Self {
            name: name.into(),
            role,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert an entry. Critical entries survive every trim.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>, critical: bool) {
        self.entries
            .lock()
            .insert(key.into(), CacheEntry { bytes, critical });
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).map(|e| e.bytes.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.lock().values().map(|e| e.bytes.len()).sum()
    }

    fn should_evict(&self, entry: &CacheEntry, level: TrimLevel) -> bool {
        if entry.critical {
            return false;
        }
        match (self.role, level) {
            (CacheRole::Transient, _) | (CacheRole::Payload { .. }, TrimLevel::Aggressive) => true,
            (CacheRole::Payload { large_bytes }, TrimLevel::Standard) => {
                entry.bytes.len() >= large_bytes
            }
        }
    }
}

impl Trimmable for TransientCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn trim(&self, level: TrimLevel) -> TrimReport {
        let mut entries = self.entries.lock();
        let mut report = TrimReport {
            cache: self.name.clone(),
            ..TrimReport::default()
        };

        entries.retain(|_, entry| {
            if self.should_evict(entry, level) {
                report.entries_removed += 1;
                report.bytes_freed += entry.bytes.len();
                false
            } else {
                true
            }
        });

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_cache_clears_everything_but_critical() {
        let cache = TransientCache::transient("routes");
        cache.insert("a->b", vec![0; 10], false);
        cache.insert("b->c", vec![0; 20], false);
        cache.insert("home", vec![0; 5], true);

        let report = cache.trim(TrimLevel::Standard);
        assert_eq!(report.entries_removed, 2);
        assert_eq!(report.bytes_freed, 30);
        assert!(cache.contains("home"));
    }

    #[test]
    fn payload_cache_standard_keeps_small_entries() {
        let cache = TransientCache::payloads("images", 100);
        cache.insert("avatar", vec![0; 50], false);
        cache.insert("banner", vec![0; 500], false);
        cache.insert("logo", vec![0; 500], true);

        let report = cache.trim(TrimLevel::Standard);
        assert_eq!(report.entries_removed, 1);
        assert!(cache.contains("avatar"));
        assert!(!cache.contains("banner"));
        assert!(cache.contains("logo"));
    }

    #[test]
    fn payload_cache_aggressive_drops_all_non_critical() {
        let cache = TransientCache::payloads("images", 100);
        cache.insert("avatar", vec![0; 50], false);
        cache.insert("logo", vec![0; 500], true);

        cache.trim(TrimLevel::Aggressive);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 500);
    }
}
