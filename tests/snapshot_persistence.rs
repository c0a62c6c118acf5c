//! Snapshot store invariants: field groups persist independently, and a
//! failed refresh never erases data an earlier cycle cached.

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;

use guide_cache::config::Config;
use guide_cache::database::Database;
use guide_cache::ingestor::RefreshService;
use guide_cache::models::{PanelSource, RefreshOutcome, SourceKind};

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

#[tokio::test]
async fn test_epg_failure_preserves_prior_epg_payload() {
    let db = test_database().await;

    // Cycle 1: catalog and EPG both succeed
    db.upsert_catalog(SourceKind::Panel, 1, "[]", "[]", 1, 0)
        .await
        .unwrap();
    db.upsert_epg(SourceKind::Panel, 1, r#"{"channels":{}}"#, 3, 40)
        .await
        .unwrap();

    // Cycle 2: catalog succeeds, EPG fetch fails (no EPG write happens)
    db.upsert_catalog(
        SourceKind::Panel,
        1,
        r#"[{"category_id":"all","category_name":"All Channels","channel_count":5}]"#,
        "[]",
        2,
        5,
    )
    .await
    .unwrap();

    let snapshot = db.get_snapshot(SourceKind::Panel, 1).await.unwrap().unwrap();
    assert_eq!(snapshot.category_count, 2);
    assert_eq!(snapshot.channel_count, 5);
    // The prior EPG payload survives the unrelated cycle
    assert_eq!(snapshot.epg_json.as_deref(), Some(r#"{"channels":{}}"#));
    assert_eq!(snapshot.epg_channel_count, 3);
    assert_eq!(snapshot.epg_program_count, 40);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_error_write_touches_only_error_columns() {
    let db = test_database().await;

    db.upsert_catalog(SourceKind::Panel, 7, r#"[{"category_id":"news","category_name":"News","channel_count":4}]"#, "[]", 1, 4)
        .await
        .unwrap();
    db.record_refresh_error(SourceKind::Panel, 7, "Connection test failed: HTTP 502")
        .await
        .unwrap();

    let snapshot = db.get_snapshot(SourceKind::Panel, 7).await.unwrap().unwrap();
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("Connection test failed: HTTP 502")
    );
    // Catalog payload from the earlier successful cycle is untouched
    assert!(snapshot.categories_json.as_deref().unwrap().contains("news"));
    assert_eq!(snapshot.channel_count, 4);

    // The next successful catalog write clears the error
    db.upsert_catalog(SourceKind::Panel, 7, "[]", "[]", 1, 0)
        .await
        .unwrap();
    let snapshot = db.get_snapshot(SourceKind::Panel, 7).await.unwrap().unwrap();
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_error_only_row_is_created_for_never_cached_source() {
    let db = test_database().await;

    db.record_refresh_error(SourceKind::Playlist, 3, "Connection test failed: timeout")
        .await
        .unwrap();

    let snapshot = db
        .get_snapshot(SourceKind::Playlist, 3)
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.categories_json.is_none());
    assert!(snapshot.epg_json.is_none());
    assert_eq!(snapshot.category_count, 0);
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn test_snapshot_is_unique_per_kind_and_id() {
    let db = test_database().await;

    db.upsert_catalog(SourceKind::Panel, 1, "[]", "[]", 1, 10)
        .await
        .unwrap();
    db.upsert_catalog(SourceKind::Playlist, 1, "[]", "[]", 2, 20)
        .await
        .unwrap();
    // Same key upserts in place instead of inserting a second row
    db.upsert_catalog(SourceKind::Panel, 1, "[]", "[]", 3, 30)
        .await
        .unwrap();

    let snapshots = db.list_snapshots().await.unwrap();
    assert_eq!(snapshots.len(), 2);

    let panel = db.get_snapshot(SourceKind::Panel, 1).await.unwrap().unwrap();
    assert_eq!(panel.channel_count, 30);
    let playlist = db
        .get_snapshot(SourceKind::Playlist, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(playlist.channel_count, 20);
}

#[tokio::test]
async fn test_credential_skip_records_error_and_keeps_catalog() {
    let db = test_database().await;

    // Panel 7 cached a catalog on an earlier cycle
    db.upsert_catalog(
        SourceKind::Panel,
        7,
        r#"[{"category_id":"all","category_name":"All Channels","channel_count":12}]"#,
        "[]",
        1,
        12,
    )
    .await
    .unwrap();

    // The panel has no playback URL and no credentials blob
    let panel = PanelSource {
        id: 7,
        name: "orphaned panel".to_string(),
        api_url: Some("http://api.example.com".to_string()),
        playback_url: None,
        credentials: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let refresh = RefreshService::new(db.clone(), &Config::default());
    let outcome = refresh.refresh_panel(&panel).await;

    match outcome {
        RefreshOutcome::Skipped(reason) => {
            assert!(reason.contains("missing Xtream credentials"));
        }
        other => panic!("expected skip, got {other:?}"),
    }

    let snapshot = db.get_snapshot(SourceKind::Panel, 7).await.unwrap().unwrap();
    assert!(snapshot
        .last_error
        .as_deref()
        .unwrap()
        .contains("missing Xtream credentials"));
    // categories_json stays whatever it was before, not cleared
    assert!(snapshot
        .categories_json
        .as_deref()
        .unwrap()
        .contains("All Channels"));
    assert_eq!(snapshot.channel_count, 12);
}
