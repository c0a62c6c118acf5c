//! In-process cache behavior: read-through population, TTL hits that bypass
//! the store, and staleness eviction against the persisted snapshot.

use sqlx::sqlite::SqlitePoolOptions;

use guide_cache::database::Database;
use guide_cache::models::SourceKind;
use guide_cache::services::GuideCache;

async fn test_database() -> Database {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    let database = Database::from_pool(pool);
    database.migrate().await.expect("migrations");
    database
}

const CATEGORIES: &str =
    r#"[{"category_id":"all","category_name":"All Channels","channel_count":1}]"#;
const CHANNELS: &str = r#"[{"stream_id":"1","name":"News One","icon":null,"category_id":"news","epg_channel_id":"news.one","is_adult":false}]"#;
const CHANNELS_V2: &str = r#"[{"stream_id":"2","name":"News Two","icon":null,"category_id":"news","epg_channel_id":"news.two","is_adult":false}]"#;

#[tokio::test]
async fn test_entry_is_fresher_than_snapshot_after_reload() {
    let db = test_database().await;
    db.upsert_catalog(SourceKind::Panel, 7, CATEGORIES, CHANNELS, 1, 1)
        .await
        .unwrap();
    let snapshot = db.get_snapshot(SourceKind::Panel, 7).await.unwrap().unwrap();

    let cache = GuideCache::new(300);
    cache.reload(&db, SourceKind::Panel, 7).await.unwrap();

    let info = cache.entry_info(SourceKind::Panel, 7).await.unwrap();
    assert!(info.cached_at >= snapshot.last_updated);
    assert_eq!(info.snapshot_last_updated, snapshot.last_updated);
}

#[tokio::test]
async fn test_ttl_hit_does_not_requery_the_store() {
    let db = test_database().await;
    db.upsert_catalog(SourceKind::Panel, 7, CATEGORIES, CHANNELS, 1, 1)
        .await
        .unwrap();

    let cache = GuideCache::new(300);
    let first = cache.get(&db, SourceKind::Panel, 7).await.unwrap().unwrap();
    assert_eq!(first.channels[0].stream_id, "1");

    // The store moves on, but within the TTL the cached payload is served
    // without a database read
    db.upsert_catalog(SourceKind::Panel, 7, CATEGORIES, CHANNELS_V2, 1, 1)
        .await
        .unwrap();
    let second = cache.get(&db, SourceKind::Panel, 7).await.unwrap().unwrap();
    assert_eq!(second.channels[0].stream_id, "1");

    // An explicit staleness check against the newer persisted timestamp
    // evicts the entry; the next read rebuilds from the store
    let snapshot = db.get_snapshot(SourceKind::Panel, 7).await.unwrap().unwrap();
    cache
        .invalidate_if_stale(SourceKind::Panel, 7, snapshot.last_updated)
        .await;
    let third = cache.get(&db, SourceKind::Panel, 7).await.unwrap().unwrap();
    assert_eq!(third.channels[0].stream_id, "2");
}

#[tokio::test]
async fn test_zero_ttl_always_rebuilds() {
    let db = test_database().await;
    db.upsert_catalog(SourceKind::Panel, 7, CATEGORIES, CHANNELS, 1, 1)
        .await
        .unwrap();

    let cache = GuideCache::new(0);
    let first = cache.get(&db, SourceKind::Panel, 7).await.unwrap().unwrap();
    assert_eq!(first.channels[0].stream_id, "1");

    db.upsert_catalog(SourceKind::Panel, 7, CATEGORIES, CHANNELS_V2, 1, 1)
        .await
        .unwrap();
    let second = cache.get(&db, SourceKind::Panel, 7).await.unwrap().unwrap();
    assert_eq!(second.channels[0].stream_id, "2");
}

#[tokio::test]
async fn test_missing_snapshot_reads_as_not_cached() {
    let db = test_database().await;
    let cache = GuideCache::new(300);

    assert!(cache
        .get(&db, SourceKind::Panel, 99)
        .await
        .unwrap()
        .is_none());

    // An error-only row (probe failed before anything was cached) is still
    // "not cached"
    db.record_refresh_error(SourceKind::Panel, 99, "Connection test failed")
        .await
        .unwrap();
    assert!(cache
        .get(&db, SourceKind::Panel, 99)
        .await
        .unwrap()
        .is_none());
}
