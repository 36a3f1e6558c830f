use bytes::Bytes;
use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{Cache, CacheError, CacheStats};
use super::models::{CacheEntry, CachedObject};
use super::tables::*;

impl Cache {
    // ========================================================================
    // Entry operations
    // ========================================================================

    /// Store a file body and its metadata, replacing any previous copy
    pub fn put_object(&self, key: &str, entry: &CacheEntry, data: &[u8]) -> Result<(), CacheError> {
        debug_assert!(!key.is_empty(), "cache key must not be empty");
        debug_assert_eq!(entry.byte_size, data.len() as u64);

        let write_txn = self.begin_write()?;
        {
            let mut entries = write_txn.open_table(CACHE_ENTRIES)?;
            let meta = rmp_serde::to_vec_named(entry)?;
            entries.insert(key, meta.as_slice())?;

            let mut bodies = write_txn.open_table(CACHE_BODIES)?;
            bodies.insert(key, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a cached file. Expired entries read as misses and are left for eviction.
    pub fn get_object(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedObject>, CacheError> {
        let read_txn = self.begin_read()?;
        let entries = read_txn.open_table(CACHE_ENTRIES)?;

        let entry: CacheEntry = match entries.get(key)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(None),
        };
        if entry.is_expired(now) {
            return Ok(None);
        }

        let bodies = read_txn.open_table(CACHE_BODIES)?;
        let data = match bodies.get(key)? {
            Some(body) => Bytes::copy_from_slice(body.value()),
            None => return Ok(None),
        };

        Ok(Some(CachedObject { entry, data }))
    }

    /// Remove one file from the cache. Returns whether it was present.
    pub fn remove_object(&self, key: &str) -> Result<bool, CacheError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut entries = write_txn.open_table(CACHE_ENTRIES)?;
            let mut bodies = write_txn.open_table(CACHE_BODIES)?;
            let had_entry = entries.remove(key)?.is_some();
            bodies.remove(key)?;
            had_entry
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Delete every entry whose TTL has run out. Returns how many were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        let write_txn = self.begin_write()?;
        let mut evicted = 0u64;

        {
            let table = write_txn.open_table(CACHE_ENTRIES)?;
            let mut expired = Vec::new();
            for result in table.iter()? {
                let (key, value) = result?;
                let entry: CacheEntry = rmp_serde::from_slice(value.value())?;
                if entry.is_expired(now) {
                    expired.push(key.value().to_string());
                }
            }
            drop(table);

            let mut entries = write_txn.open_table(CACHE_ENTRIES)?;
            let mut bodies = write_txn.open_table(CACHE_BODIES)?;
            for key in expired {
                entries.remove(key.as_str())?;
                bodies.remove(key.as_str())?;
                evicted += 1;
            }
        }

        write_txn.commit()?;
        Ok(evicted)
    }

    /// Count cached entries and their total size
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CACHE_ENTRIES)?;

        let mut stats = CacheStats::default();
        for result in table.iter()? {
            let (_, value) = result?;
            let entry: CacheEntry = rmp_serde::from_slice(value.value())?;
            stats.entries += 1;
            stats.bytes += entry.byte_size;
        }
        Ok(stats)
    }
}
