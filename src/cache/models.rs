use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Ten years; longer TTLs are clamped.
const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Metadata for a cached file, stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_type: String,
    pub byte_size: u64,
    /// Label of the node that served the file
    pub source: String,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        content_type: &str,
        byte_size: u64,
        source: &str,
        now: DateTime<Utc>,
        ttl_seconds: u64,
    ) -> Self {
        let ttl = Duration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64);
        Self {
            content_type: content_type.to_string(),
            byte_size,
            source: source.to_string(),
            stored_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A cache hit: metadata plus body
#[derive(Debug, Clone)]
pub struct CachedObject {
    pub entry: CacheEntry,
    pub data: Bytes,
}
