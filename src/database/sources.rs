//! Read access to source records
//!
//! Panels and playlists are created and edited by the admin CRUD, which is
//! external to this service; the refresh pipeline only reads them.

use anyhow::Result;
use sqlx::Row;

use super::{parse_datetime, Database};
use crate::models::{PanelSource, PlaylistSource};

impl Database {
    pub async fn list_active_panels(&self) -> Result<Vec<PanelSource>> {
        let rows = sqlx::query(
            "SELECT id, name, api_url, playback_url, credentials, is_active,
                    created_at, updated_at
             FROM panels WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool())
        .await?;

        rows.into_iter().map(panel_from_row).collect()
    }

    pub async fn get_panel(&self, id: i64) -> Result<Option<PanelSource>> {
        let row = sqlx::query(
            "SELECT id, name, api_url, playback_url, credentials, is_active,
                    created_at, updated_at
             FROM panels WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool())
        .await?;

        row.map(panel_from_row).transpose()
    }

    pub async fn list_active_playlists(&self) -> Result<Vec<PlaylistSource>> {
        let rows = sqlx::query(
            "SELECT id, name, guide_username, guide_password, is_active,
                    created_at, updated_at
             FROM playlists WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool())
        .await?;

        rows.into_iter().map(playlist_from_row).collect()
    }

    pub async fn get_playlist(&self, id: i64) -> Result<Option<PlaylistSource>> {
        let row = sqlx::query(
            "SELECT id, name, guide_username, guide_password, is_active,
                    created_at, updated_at
             FROM playlists WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool())
        .await?;

        row.map(playlist_from_row).transpose()
    }
}

fn panel_from_row(row: sqlx::sqlite::SqliteRow) -> Result<PanelSource> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(PanelSource {
        id: row.get("id"),
        name: row.get("name"),
        api_url: row.get("api_url"),
        playback_url: row.get("playback_url"),
        credentials: row.get("credentials"),
        is_active: row.get("is_active"),
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn playlist_from_row(row: sqlx::sqlite::SqliteRow) -> Result<PlaylistSource> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(PlaylistSource {
        id: row.get("id"),
        name: row.get("name"),
        guide_username: row.get("guide_username"),
        guide_password: row.get("guide_password"),
        is_active: row.get("is_active"),
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}
