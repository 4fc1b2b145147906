//! # Cache Types
//!
//! Requests handed in by collaborators, the entries the store owns, and the
//! aggregate statistics it maintains.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied urgency hint. Ordered `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// A resource a collaborator expects to need soon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItemRequest {
    /// Resource locator, unique within a cache instance
    pub key: String,
    pub priority: Priority,
    /// Expected payload size, used for reservation before the fetch
    pub size_hint: Option<u64>,
    /// Payload category (video, audio, document, image)
    pub kind: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Content-time distance from the current position
    pub starts_in: Option<Duration>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CacheItemRequest {
    pub fn new(key: impl Into<String>, priority: Priority) -> Self {
        Self {
            key: key.into(),
            priority,
            size_hint: None,
            kind: None,
            expires_at: None,
            starts_in: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_starts_in(mut self, starts_in: Duration) -> Self {
        self.starts_in = Some(starts_in);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A fetched resource together with its accounting metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Bytes,
    /// Measured from the payload, never from the request hint
    pub size_bytes: u64,
    pub inserted_at: DateTime<Utc>,
    pub hit_count: u64,
    pub priority: Priority,
    pub expires_at: Option<DateTime<Utc>>,
    pub kind: Option<String>,
    /// Insertion order, assigned by the store
    pub(crate) sequence: u64,
}

impl CacheEntry {
    pub fn new(payload: Bytes, priority: Priority) -> Self {
        Self {
            size_bytes: payload.len() as u64,
            payload,
            inserted_at: Utc::now(),
            hit_count: 0,
            priority,
            expires_at: None,
            kind: None,
            sequence: 0,
        }
    }

    /// Build the entry for a fetched request, copying its priority, kind and expiry.
    pub fn from_request(request: &CacheItemRequest, payload: Bytes) -> Self {
        let mut entry = Self::new(payload, request.priority);
        entry.expires_at = request.expires_at;
        entry.kind = request.kind.clone();
        entry
    }

    pub fn with_inserted_at(mut self, inserted_at: DateTime<Utc>) -> Self {
        self.inserted_at = inserted_at;
        self
    }

    /// Stale entries are older than `ttl` or past their own expiry.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Option<Duration>) -> bool {
        if self.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return true;
        }
        match ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()) {
            Some(ttl) => now.signed_duration_since(self.inserted_at) > ttl,
            None => false,
        }
    }
}

/// Aggregate statistics maintained incrementally by the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_items: usize,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}
