//! Guide snapshot persistence
//!
//! One row per `(source_kind, source_id)`. Each field group (live catalog,
//! EPG, VOD, series) is upserted independently so a failure in one group
//! never clears data a previous cycle cached for another. Error recording
//! touches only `last_error`/`last_updated`.

use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use tracing::debug;

use super::{parse_datetime, Database};
use crate::models::{GuideSnapshot, SourceKind};

impl Database {
    pub async fn get_snapshot(
        &self,
        kind: SourceKind,
        source_id: i64,
    ) -> Result<Option<GuideSnapshot>> {
        let row = sqlx::query(
            "SELECT source_kind, source_id, categories_json, channels_json,
                    category_count, channel_count, epg_json, epg_channel_count,
                    epg_program_count, vod_categories_json, vod_streams_json,
                    series_categories_json, series_json, last_updated, last_error
             FROM guide_snapshots WHERE source_kind = ? AND source_id = ?",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .fetch_optional(&self.pool())
        .await?;

        row.map(snapshot_from_row).transpose()
    }

    pub async fn list_snapshots(&self) -> Result<Vec<GuideSnapshot>> {
        let rows = sqlx::query(
            "SELECT source_kind, source_id, categories_json, channels_json,
                    category_count, channel_count, epg_json, epg_channel_count,
                    epg_program_count, vod_categories_json, vod_streams_json,
                    series_categories_json, series_json, last_updated, last_error
             FROM guide_snapshots ORDER BY source_kind, source_id",
        )
        .fetch_all(&self.pool())
        .await?;

        rows.into_iter().map(snapshot_from_row).collect()
    }

    /// Persist the live catalog field group and clear any recorded error.
    /// A successful catalog fetch is what makes a refresh "successful".
    pub async fn upsert_catalog(
        &self,
        kind: SourceKind,
        source_id: i64,
        categories_json: &str,
        channels_json: &str,
        category_count: i64,
        channel_count: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO guide_snapshots
               (source_kind, source_id, categories_json, channels_json,
                category_count, channel_count, last_updated, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
             ON CONFLICT(source_kind, source_id) DO UPDATE SET
               categories_json = excluded.categories_json,
               channels_json = excluded.channels_json,
               category_count = excluded.category_count,
               channel_count = excluded.channel_count,
               last_updated = excluded.last_updated,
               last_error = NULL",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .bind(categories_json)
        .bind(channels_json)
        .bind(category_count)
        .bind(channel_count)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool())
        .await?;

        debug!(
            "Upserted catalog for ({}, {}): {} categories, {} channels",
            kind, source_id, category_count, channel_count
        );
        Ok(())
    }

    /// Persist the EPG field group. Other field groups are untouched.
    pub async fn upsert_epg(
        &self,
        kind: SourceKind,
        source_id: i64,
        epg_json: &str,
        epg_channel_count: i64,
        epg_program_count: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO guide_snapshots
               (source_kind, source_id, epg_json, epg_channel_count,
                epg_program_count, last_updated)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_kind, source_id) DO UPDATE SET
               epg_json = excluded.epg_json,
               epg_channel_count = excluded.epg_channel_count,
               epg_program_count = excluded.epg_program_count,
               last_updated = excluded.last_updated",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .bind(epg_json)
        .bind(epg_channel_count)
        .bind(epg_program_count)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    /// Persist the VOD field group
    pub async fn upsert_vod(
        &self,
        kind: SourceKind,
        source_id: i64,
        vod_categories_json: &str,
        vod_streams_json: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO guide_snapshots
               (source_kind, source_id, vod_categories_json, vod_streams_json, last_updated)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(source_kind, source_id) DO UPDATE SET
               vod_categories_json = excluded.vod_categories_json,
               vod_streams_json = excluded.vod_streams_json,
               last_updated = excluded.last_updated",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .bind(vod_categories_json)
        .bind(vod_streams_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    /// Persist the series field group
    pub async fn upsert_series(
        &self,
        kind: SourceKind,
        source_id: i64,
        series_categories_json: &str,
        series_json: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO guide_snapshots
               (source_kind, source_id, series_categories_json, series_json, last_updated)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(source_kind, source_id) DO UPDATE SET
               series_categories_json = excluded.series_categories_json,
               series_json = excluded.series_json,
               last_updated = excluded.last_updated",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .bind(series_categories_json)
        .bind(series_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    /// Record a refresh failure. Payload columns keep whatever the last
    /// successful cycle wrote.
    pub async fn record_refresh_error(
        &self,
        kind: SourceKind,
        source_id: i64,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO guide_snapshots (source_kind, source_id, last_updated, last_error)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(source_kind, source_id) DO UPDATE SET
               last_updated = excluded.last_updated,
               last_error = excluded.last_error",
        )
        .bind(kind.as_str())
        .bind(source_id)
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .execute(&self.pool())
        .await?;
        Ok(())
    }
}

fn snapshot_from_row(row: sqlx::sqlite::SqliteRow) -> Result<GuideSnapshot> {
    let kind_str: String = row.get("source_kind");
    let source_kind = SourceKind::parse(&kind_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown source kind: {}", kind_str))?;
    let last_updated: String = row.get("last_updated");

    Ok(GuideSnapshot {
        source_kind,
        source_id: row.get("source_id"),
        categories_json: row.get("categories_json"),
        channels_json: row.get("channels_json"),
        category_count: row.get("category_count"),
        channel_count: row.get("channel_count"),
        epg_json: row.get("epg_json"),
        epg_channel_count: row.get("epg_channel_count"),
        epg_program_count: row.get("epg_program_count"),
        vod_categories_json: row.get("vod_categories_json"),
        vod_streams_json: row.get("vod_streams_json"),
        series_categories_json: row.get("series_categories_json"),
        series_json: row.get("series_json"),
        last_updated: parse_datetime(&last_updated)?,
        last_error: row.get("last_error"),
    })
}
