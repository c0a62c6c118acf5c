//! Short-lived in-process guide cache
//!
//! A read-through, write-never accelerator over the persisted snapshot
//! store. Entries expire on a fixed TTL; the scheduler additionally reloads
//! or invalidates entries when it observes a newer persisted `last_updated`,
//! whichever rule strikes first. Within the TTL a hit never touches the
//! database.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::database::Database;
use crate::models::{Category, EpgData, GuideSnapshot, LiveStream, SourceKind};

/// Parsed snapshot payload shared between concurrent readers
#[derive(Debug, Clone)]
pub struct CachedGuide {
    pub categories: Vec<Category>,
    pub channels: Vec<LiveStream>,
    pub epg: Option<EpgData>,
    /// `last_updated` of the snapshot this payload was built from
    pub last_updated: DateTime<Utc>,
}

impl CachedGuide {
    /// Build from a snapshot row; requires the live catalog field group.
    fn from_snapshot(snapshot: &GuideSnapshot) -> Option<Self> {
        let categories_json = snapshot.categories_json.as_deref()?;
        let channels_json = snapshot.channels_json.as_deref()?;

        let categories: Vec<Category> = serde_json::from_str(categories_json).ok()?;
        let channels: Vec<LiveStream> = serde_json::from_str(channels_json).ok()?;
        let epg = snapshot
            .epg_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok());

        Some(Self {
            categories,
            channels,
            epg,
            last_updated: snapshot.last_updated,
        })
    }
}

#[derive(Clone)]
struct CacheEntry {
    payload: Arc<CachedGuide>,
    cached_at: DateTime<Utc>,
}

/// Metadata about one cache entry, exposed for freshness checks and tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntryInfo {
    pub cached_at: DateTime<Utc>,
    pub snapshot_last_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct GuideCache {
    entries: Arc<RwLock<HashMap<(SourceKind, i64), CacheEntry>>>,
    ttl: Duration,
}

impl GuideCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Read-through get. A TTL-fresh entry is served without touching the
    /// store; otherwise the entry is rebuilt from the persisted snapshot.
    /// Returns `None` when no usable snapshot exists.
    pub async fn get(
        &self,
        database: &Database,
        kind: SourceKind,
        source_id: i64,
    ) -> anyhow::Result<Option<Arc<CachedGuide>>> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&(kind, source_id)) {
                if is_fresh(entry.cached_at, now, self.ttl) {
                    return Ok(Some(entry.payload.clone()));
                }
            }
        }

        self.reload(database, kind, source_id).await
    }

    /// Rebuild an entry from the persisted snapshot, replacing any cached one
    pub async fn reload(
        &self,
        database: &Database,
        kind: SourceKind,
        source_id: i64,
    ) -> anyhow::Result<Option<Arc<CachedGuide>>> {
        let snapshot = database.get_snapshot(kind, source_id).await?;
        let payload = match snapshot.as_ref().and_then(CachedGuide::from_snapshot) {
            Some(payload) => Arc::new(payload),
            None => {
                // Nothing cached upstream; drop any stale local entry too
                self.entries.write().await.remove(&(kind, source_id));
                debug!("No usable snapshot for ({kind}, {source_id})");
                return Ok(None);
            }
        };

        let mut entries = self.entries.write().await;
        entries.insert(
            (kind, source_id),
            CacheEntry {
                payload: payload.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(Some(payload))
    }

    /// Drop an entry outright
    pub async fn invalidate(&self, kind: SourceKind, source_id: i64) {
        self.entries.write().await.remove(&(kind, source_id));
    }

    /// Drop an entry when the persisted snapshot has moved past it. Used by
    /// refresh paths that know the store just changed; stricter than TTL.
    pub async fn invalidate_if_stale(
        &self,
        kind: SourceKind,
        source_id: i64,
        persisted_last_updated: DateTime<Utc>,
    ) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&(kind, source_id)) {
            if entry.payload.last_updated < persisted_last_updated {
                warn!(
                    "Evicting stale cache entry for ({kind}, {source_id}): cached {} < persisted {}",
                    entry.payload.last_updated, persisted_last_updated
                );
                entries.remove(&(kind, source_id));
            }
        }
    }

    pub async fn entry_info(&self, kind: SourceKind, source_id: i64) -> Option<CacheEntryInfo> {
        let entries = self.entries.read().await;
        entries.get(&(kind, source_id)).map(|entry| CacheEntryInfo {
            cached_at: entry.cached_at,
            snapshot_last_updated: entry.payload.last_updated,
        })
    }
}

fn is_fresh(cached_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    now.signed_duration_since(cached_at) < ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ttl_freshness() {
        let ttl = Duration::seconds(300);
        let cached_at = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();

        assert!(is_fresh(cached_at, cached_at + Duration::seconds(299), ttl));
        assert!(!is_fresh(cached_at, cached_at + Duration::seconds(300), ttl));
        assert!(!is_fresh(cached_at, cached_at + Duration::seconds(301), ttl));
    }

    #[test]
    fn test_payload_requires_catalog_field_group() {
        let snapshot = GuideSnapshot {
            source_kind: SourceKind::Panel,
            source_id: 1,
            categories_json: None,
            channels_json: None,
            category_count: 0,
            channel_count: 0,
            epg_json: None,
            epg_channel_count: 0,
            epg_program_count: 0,
            vod_categories_json: None,
            vod_streams_json: None,
            series_categories_json: None,
            series_json: None,
            last_updated: Utc::now(),
            last_error: Some("Connection test failed".to_string()),
        };
        // An error-only row never materializes as a cache payload
        assert!(CachedGuide::from_snapshot(&snapshot).is_none());

        let populated = GuideSnapshot {
            categories_json: Some(r#"[{"category_id":"all","category_name":"All","channel_count":1}]"#.to_string()),
            channels_json: Some(
                r#"[{"stream_id":"1","name":"News","icon":null,"category_id":"5","epg_channel_id":null,"is_adult":false}]"#
                    .to_string(),
            ),
            ..snapshot
        };
        let payload = CachedGuide::from_snapshot(&populated).unwrap();
        assert_eq!(payload.channels.len(), 1);
        assert!(payload.epg.is_none());
    }
}
