//! # Cache Store
//!
//! The single owner of cached entries and of the aggregate statistics derived
//! from them. Every mutation goes through this type so that the totals always
//! match the entry set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::CacheOptions;
use crate::error::CacheError;
use crate::eviction::{EvictionPolicy, EvictionTarget};
use crate::stats::HumanSize;
use crate::types::{AggregateStats, CacheEntry};

/// Handle shared between the orchestrator and collaborators. The lock is
/// never held across an `.await`.
pub type SharedStore = Arc<Mutex<CacheStore>>;

#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    stats: AggregateStats,
    max_size_bytes: u64,
    max_items: usize,
    ttl: Option<Duration>,
    next_sequence: u64,
}

impl CacheStore {
    pub fn new(options: &CacheOptions) -> Self {
        debug!(
            max_size = %HumanSize(options.max_size_bytes),
            max_items = options.max_items,
            "Cache store created"
        );

        Self {
            entries: HashMap::new(),
            stats: AggregateStats::default(),
            max_size_bytes: options.max_size_bytes,
            max_items: options.max_items,
            ttl: options.ttl(),
            next_sequence: 0,
        }
    }

    pub fn shared(options: &CacheOptions) -> SharedStore {
        Arc::new(Mutex::new(Self::new(options)))
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry into previously reserved headroom.
    ///
    /// Replacing an existing key releases the old entry's space first. Fails
    /// with [`CacheError::ItemTooLarge`] when the entry can never fit and with
    /// [`CacheError::CapacityExceeded`] when space was not reserved.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        mut entry: CacheEntry,
    ) -> Result<(), CacheError> {
        let key = key.into();
        if entry.size_bytes > self.max_size_bytes {
            return Err(CacheError::ItemTooLarge {
                size: entry.size_bytes,
                max: self.max_size_bytes,
            });
        }

        let (replaced_bytes, replaced_items) = self
            .entries
            .get(&key)
            .map(|existing| (existing.size_bytes, 1))
            .unwrap_or((0, 0));
        let items_after = self.stats.total_items - replaced_items + 1;
        let bytes_after = self.stats.total_size_bytes - replaced_bytes + entry.size_bytes;
        if items_after > self.max_items || bytes_after > self.max_size_bytes {
            return Err(self.capacity_error(entry.size_bytes));
        }

        if replaced_items > 0 {
            self.remove(&key);
        }

        entry.sequence = self.next_sequence;
        self.next_sequence += 1;

        self.stats.total_items += 1;
        self.stats.total_size_bytes += entry.size_bytes;
        self.stats.oldest_entry = Some(match self.stats.oldest_entry {
            Some(oldest) => oldest.min(entry.inserted_at),
            None => entry.inserted_at,
        });
        self.stats.newest_entry = Some(match self.stats.newest_entry {
            Some(newest) => newest.max(entry.inserted_at),
            None => entry.inserted_at,
        });
        self.entries.insert(key, entry);

        Ok(())
    }

    /// Read a payload. Exactly one of the hit or miss counters moves per call.
    pub fn lookup(&mut self, key: &str) -> Option<Bytes> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.hit_count += 1;
                self.stats.hit_count += 1;
                Some(entry.payload.clone())
            }
            None => {
                self.stats.miss_count += 1;
                None
            }
        }
    }

    /// Presence check without hit/miss accounting.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.stats.total_items -= 1;
        self.stats.total_size_bytes -= removed.size_bytes;
        self.recompute_bounds();
        Some(removed)
    }

    /// Drop every entry and reset all counters, lifetime hit/miss included.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = AggregateStats::default();
        debug!("Cache store cleared");
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.stats.clone()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    /// Make room for one more entry of `size_hint` bytes, evicting as needed.
    ///
    /// Returns the evicted keys. When the requirement cannot be met even after
    /// evicting everything possible, returns [`CacheError::CapacityExceeded`].
    pub fn reserve(&mut self, size_hint: u64) -> Result<Vec<String>, CacheError> {
        let mut evicted = Vec::new();

        if self.entries.len() >= self.max_items {
            let needed = self.entries.len() + 1 - self.max_items;
            evicted.extend(self.evict(EvictionTarget::Items(needed)));
        }

        let projected = self.stats.total_size_bytes.saturating_add(size_hint);
        if projected > self.max_size_bytes {
            evicted.extend(self.evict(EvictionTarget::Bytes(projected - self.max_size_bytes)));
        }

        if self.entries.len() >= self.max_items
            || self.stats.total_size_bytes.saturating_add(size_hint) > self.max_size_bytes
        {
            return Err(self.capacity_error(size_hint));
        }

        Ok(evicted)
    }

    /// Reserve space for an entry of known size and insert it. An entry larger
    /// than the whole budget is rejected before anything is evicted.
    pub fn admit(
        &mut self,
        key: impl Into<String>,
        entry: CacheEntry,
    ) -> Result<Vec<String>, CacheError> {
        if entry.size_bytes > self.max_size_bytes {
            return Err(CacheError::ItemTooLarge {
                size: entry.size_bytes,
                max: self.max_size_bytes,
            });
        }

        let key = key.into();
        // A replacement frees its own slot and bytes
        if let Some(existing) = self.remove(&key) {
            debug!(key = %key, size = existing.size_bytes, "Replacing cached entry");
        }

        let evicted = self.reserve(entry.size_bytes)?;
        self.insert(key, entry)?;
        Ok(evicted)
    }

    fn evict(&mut self, target: EvictionTarget) -> Vec<String> {
        let victims =
            EvictionPolicy::new(self.ttl).select_victims(self.entries(), target, Utc::now());

        for key in &victims {
            if let Some(entry) = self.remove(key) {
                debug!(
                    key = %key,
                    size = %HumanSize(entry.size_bytes),
                    priority = ?entry.priority,
                    hits = entry.hit_count,
                    "Evicted entry from cache"
                );
            }
        }

        victims
    }

    fn recompute_bounds(&mut self) {
        self.stats.oldest_entry = self.entries.values().map(|e| e.inserted_at).min();
        self.stats.newest_entry = self.entries.values().map(|e| e.inserted_at).max();
    }

    fn capacity_error(&self, requested_bytes: u64) -> CacheError {
        CacheError::CapacityExceeded {
            requested_bytes,
            available_bytes: self.max_size_bytes.saturating_sub(self.stats.total_size_bytes),
            available_slots: self.max_items.saturating_sub(self.entries.len()),
        }
    }
}
