use redb::TableDefinition;

/// Cache metadata: storage key -> CacheEntry (msgpack)
pub const CACHE_ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_entries");

/// Cached file contents: storage key -> raw bytes
pub const CACHE_BODIES: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_bodies");
