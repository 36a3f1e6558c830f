use chrono::{Duration, Utc};
use file_cluster::cache::{Cache, CacheEntry, CacheStats};

fn test_cache() -> (tempfile::TempDir, Cache) {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::open(dir.path().join("data")).unwrap();
    (dir, cache)
}

fn sample_entry(data: &[u8], ttl_seconds: u64) -> CacheEntry {
    CacheEntry::new(
        "image/png",
        data.len() as u64,
        "gitlab (pic1)",
        Utc::now(),
        ttl_seconds,
    )
}

#[test]
fn test_put_and_get_object() {
    let (_dir, cache) = test_cache();
    let data = b"png bytes";
    let entry = sample_entry(data, 60);

    cache.put_object("pics/a.png", &entry, data).unwrap();

    let hit = cache
        .get_object("pics/a.png", Utc::now())
        .unwrap()
        .expect("object should be cached");
    assert_eq!(hit.data.as_ref(), data);
    assert_eq!(hit.entry, entry);
    assert_eq!(hit.entry.source, "gitlab (pic1)");
    assert_eq!(hit.entry.content_type, "image/png");
}

#[test]
fn test_get_missing_object() {
    let (_dir, cache) = test_cache();
    assert!(cache.get_object("pics/none.png", Utc::now()).unwrap().is_none());
}

#[test]
fn test_expired_object_is_a_miss() {
    let (_dir, cache) = test_cache();
    let data = b"old";
    cache
        .put_object("pics/old.png", &sample_entry(data, 10), data)
        .unwrap();

    let later = Utc::now() + Duration::seconds(11);
    assert!(cache.get_object("pics/old.png", later).unwrap().is_none());
    // Still stored until evicted
    assert_eq!(cache.stats().unwrap().entries, 1);
}

#[test]
fn test_put_replaces_previous_copy() {
    let (_dir, cache) = test_cache();
    cache
        .put_object("k", &sample_entry(b"first", 60), b"first")
        .unwrap();
    cache
        .put_object("k", &sample_entry(b"second!", 60), b"second!")
        .unwrap();

    let hit = cache.get_object("k", Utc::now()).unwrap().unwrap();
    assert_eq!(hit.data.as_ref(), b"second!");
    assert_eq!(
        cache.stats().unwrap(),
        CacheStats {
            entries: 1,
            bytes: 7
        }
    );
}

#[test]
fn test_remove_object() {
    let (_dir, cache) = test_cache();
    cache.put_object("k", &sample_entry(b"x", 60), b"x").unwrap();

    assert!(cache.remove_object("k").unwrap());
    assert!(!cache.remove_object("k").unwrap());
    assert!(cache.get_object("k", Utc::now()).unwrap().is_none());
}

#[test]
fn test_evict_expired_keeps_fresh_entries() {
    let (_dir, cache) = test_cache();
    cache
        .put_object("short", &sample_entry(b"a", 5), b"a")
        .unwrap();
    cache
        .put_object("long", &sample_entry(b"bb", 3600), b"bb")
        .unwrap();

    let later = Utc::now() + Duration::seconds(60);
    assert_eq!(cache.evict_expired(later).unwrap(), 1);
    assert_eq!(cache.evict_expired(later).unwrap(), 0);

    assert!(cache.get_object("long", later).unwrap().is_some());
    assert_eq!(
        cache.stats().unwrap(),
        CacheStats {
            entries: 1,
            bytes: 2
        }
    );
}

#[test]
fn test_purge_all() {
    let (_dir, cache) = test_cache();
    for key in ["a", "b", "c"] {
        cache.put_object(key, &sample_entry(b"z", 60), b"z").unwrap();
    }

    let stats = cache.purge_all().unwrap();
    assert_eq!(stats.entries, 3);
    assert_eq!(cache.stats().unwrap(), CacheStats::default());
}

#[test]
fn test_reopen_keeps_entries() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = Cache::open(dir.path()).unwrap();
        cache
            .put_object("k", &sample_entry(b"persist", 60), b"persist")
            .unwrap();
    }

    let cache = Cache::open(dir.path()).unwrap();
    let hit = cache.get_object("k", Utc::now()).unwrap().unwrap();
    assert_eq!(hit.data.as_ref(), b"persist");
}
