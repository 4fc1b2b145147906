//! # Eviction Policy
//!
//! Ranks cache entries for removal. The policy is pure: it reads the entry set
//! and returns victim keys, and the store performs the removals.
//!
//! Victims are ordered by:
//! 1. priority, `Low` first
//! 2. hit count, least used first
//! 3. insertion time, oldest first
//! 4. stale entries before fresh ones
//! 5. insertion sequence

use std::cmp::Reverse;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::CacheEntry;

/// Amount of space an eviction pass has to free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionTarget {
    /// Free at least this many bytes
    Bytes(u64),
    /// Free at least this many entries, subject to the batch minimum
    Items(usize),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionPolicy {
    ttl: Option<Duration>,
}

impl EvictionPolicy {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self { ttl }
    }

    /// Minimum number of entries freed by an item-count pass: 10% of the
    /// current count rounded up, and never fewer than one.
    pub fn batch_size(current_items: usize) -> usize {
        current_items.div_ceil(10).max(1)
    }

    /// Every key, in eviction order.
    pub fn rank<'a, I>(&self, entries: I, now: DateTime<Utc>) -> Vec<&'a str>
    where
        I: IntoIterator<Item = (&'a str, &'a CacheEntry)>,
    {
        let mut ranked: Vec<(&'a str, &'a CacheEntry)> = entries.into_iter().collect();
        ranked.sort_by_key(|(_, entry)| {
            (
                entry.priority,
                entry.hit_count,
                entry.inserted_at,
                Reverse(entry.is_stale(now, self.ttl)),
                entry.sequence,
            )
        });
        ranked.into_iter().map(|(key, _)| key).collect()
    }

    /// Walk the eviction order and stop as soon as `target` is met. When the
    /// target exceeds what the entries hold, every key is returned.
    pub fn select_victims<'a, I>(
        &self,
        entries: I,
        target: EvictionTarget,
        now: DateTime<Utc>,
    ) -> Vec<String>
    where
        I: IntoIterator<Item = (&'a str, &'a CacheEntry)>,
    {
        let entries: Vec<(&'a str, &'a CacheEntry)> = entries.into_iter().collect();
        let sizes: std::collections::HashMap<&str, u64> = entries
            .iter()
            .map(|(key, entry)| (*key, entry.size_bytes))
            .collect();
        let ranked = self.rank(entries.iter().copied(), now);

        match target {
            EvictionTarget::Items(requested) => {
                let count = requested.max(Self::batch_size(ranked.len()));
                ranked
                    .into_iter()
                    .take(count)
                    .map(str::to_owned)
                    .collect()
            }
            EvictionTarget::Bytes(required) => {
                let mut freed = 0u64;
                let mut victims = Vec::new();
                for key in ranked {
                    if freed >= required {
                        break;
                    }
                    freed += sizes.get(key).copied().unwrap_or(0);
                    victims.push(key.to_owned());
                }
                victims
            }
        }
    }
}
