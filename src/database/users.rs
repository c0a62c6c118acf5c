//! Read access to user service lines
//!
//! The session layer authenticates a caller and hands this service a user id;
//! the line record resolves which source and personal credentials apply to
//! that user's guide requests. Account CRUD lives outside this service.

use anyhow::Result;
use sqlx::Row;

use super::Database;
use crate::models::UserLine;

impl Database {
    pub async fn get_user_line(&self, user_id: i64) -> Result<Option<UserLine>> {
        let row = sqlx::query(
            "SELECT user_id, panel_id, panel_username, panel_password, playlist_id
             FROM user_lines WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool())
        .await?;

        Ok(row.map(|row| UserLine {
            user_id: row.get("user_id"),
            panel_id: row.get("panel_id"),
            panel_username: row.get("panel_username"),
            panel_password: row.get("panel_password"),
            playlist_id: row.get("playlist_id"),
        }))
    }
}
