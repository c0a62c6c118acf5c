//! Cache refresh orchestration
//!
//! Per source the refresh is a strict pipeline with independent failure
//! domains: connectivity probe (hard stop) → live catalog (required) → EPG →
//! VOD → series (each best-effort). Every field group persists through its
//! own upsert, so a failed group leaves whatever an earlier cycle cached.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::models::{
    Category, LiveStream, PanelSource, PlaylistSource, RefreshOutcome, RefreshStats,
    RefreshSummary, SourceKind, ALL_CATEGORY_ID,
};
use crate::sources::credentials::{
    derive_panel_credentials, derive_playlist_credentials, XtreamCredentials,
};
use crate::sources::XtreamClient;
use crate::utils::epg_parser::parse_guide;

#[derive(Clone)]
pub struct RefreshService {
    database: Database,
    client: XtreamClient,
    epg_retention_days: i64,
    playlist_gateway_url: Option<String>,
}

impl RefreshService {
    pub fn new(database: Database, config: &Config) -> Self {
        Self {
            database,
            client: XtreamClient::new(&config.ingestion),
            epg_retention_days: config.ingestion.epg_retention_days,
            playlist_gateway_url: config.guide.playlist_gateway_url.clone(),
        }
    }

    /// Refresh one panel source. Credential-derivation failure skips the
    /// panel for this cycle; it is not counted as failed.
    pub async fn refresh_panel(&self, panel: &PanelSource) -> RefreshOutcome {
        let creds = match derive_panel_credentials(panel) {
            Some(creds) => creds,
            None => {
                let reason = format!(
                    "Refresh skipped for panel '{}': missing Xtream credentials",
                    panel.name
                );
                warn!("{reason}");
                if let Err(e) = self
                    .database
                    .record_refresh_error(SourceKind::Panel, panel.id, &reason)
                    .await
                {
                    warn!("Failed to record skip for panel '{}': {e}", panel.name);
                }
                return RefreshOutcome::Skipped(reason);
            }
        };

        self.refresh_source(SourceKind::Panel, panel.id, &panel.name, &creds)
            .await
    }

    /// Refresh one playlist source through the shared gateway
    pub async fn refresh_playlist(&self, playlist: &PlaylistSource) -> RefreshOutcome {
        let Some(gateway_url) = self.playlist_gateway_url.as_deref() else {
            let reason = format!(
                "Refresh skipped for playlist '{}': no playlist gateway URL configured",
                playlist.name
            );
            warn!("{reason}");
            return RefreshOutcome::Skipped(reason);
        };

        let creds = match derive_playlist_credentials(playlist, gateway_url) {
            Some(creds) => creds,
            None => {
                let reason = format!(
                    "Refresh skipped for playlist '{}': missing guide credentials",
                    playlist.name
                );
                warn!("{reason}");
                if let Err(e) = self
                    .database
                    .record_refresh_error(SourceKind::Playlist, playlist.id, &reason)
                    .await
                {
                    warn!("Failed to record skip for playlist '{}': {e}", playlist.name);
                }
                return RefreshOutcome::Skipped(reason);
            }
        };

        self.refresh_source(SourceKind::Playlist, playlist.id, &playlist.name, &creds)
            .await
    }

    pub async fn refresh_panel_by_id(&self, panel_id: i64) -> Result<RefreshOutcome> {
        match self.database.get_panel(panel_id).await? {
            Some(panel) => Ok(self.refresh_panel(&panel).await),
            None => Ok(RefreshOutcome::Failed(format!(
                "Panel {panel_id} not found"
            ))),
        }
    }

    pub async fn refresh_playlist_by_id(&self, playlist_id: i64) -> Result<RefreshOutcome> {
        match self.database.get_playlist(playlist_id).await? {
            Some(playlist) => Ok(self.refresh_playlist(&playlist).await),
            None => Ok(RefreshOutcome::Failed(format!(
                "Playlist {playlist_id} not found"
            ))),
        }
    }

    /// Refresh every active panel, invoking `on_progress` after each one
    pub async fn refresh_all_panels<F>(&self, mut on_progress: F) -> Result<RefreshSummary>
    where
        F: FnMut(&RefreshSummary),
    {
        let panels = self.database.list_active_panels().await?;
        let mut summary = RefreshSummary::default();
        for panel in &panels {
            let outcome = self.refresh_panel(panel).await;
            summary.record(&outcome);
            on_progress(&summary);
        }
        info!(
            "Panel refresh cycle finished: {}/{} succeeded, {} failed, {} skipped",
            summary.success, summary.total, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// Refresh every active playlist, invoking `on_progress` after each one
    pub async fn refresh_all_playlists<F>(&self, mut on_progress: F) -> Result<RefreshSummary>
    where
        F: FnMut(&RefreshSummary),
    {
        let playlists = self.database.list_active_playlists().await?;
        let mut summary = RefreshSummary::default();
        for playlist in &playlists {
            let outcome = self.refresh_playlist(playlist).await;
            summary.record(&outcome);
            on_progress(&summary);
        }
        info!(
            "Playlist refresh cycle finished: {}/{} succeeded, {} failed, {} skipped",
            summary.success, summary.total, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// The shared per-source pipeline
    async fn refresh_source(
        &self,
        kind: SourceKind,
        source_id: i64,
        name: &str,
        creds: &XtreamCredentials,
    ) -> RefreshOutcome {
        let started = Utc::now();
        info!("Starting refresh for {kind} source '{name}' ({source_id})");

        // Stage 1: connectivity probe. A failed probe stops the pipeline and
        // records the error; prior cached payloads stay untouched.
        let probe = self.client.test_connection(creds).await;
        if !probe.success {
            let error = format!("Connection test failed: {}", probe.message);
            warn!("{kind} source '{name}': {error}");
            if let Err(e) = self
                .database
                .record_refresh_error(kind, source_id, &error)
                .await
            {
                warn!("Failed to record refresh error for '{name}': {e}");
            }
            return RefreshOutcome::Failed(error);
        }

        let mut stats = RefreshStats::default();

        // Stage 2: live catalog, required for a successful refresh
        let categories = match self.client.get_live_categories(creds).await {
            Ok(categories) => categories,
            Err(e) => return self.fail_catalog(kind, source_id, name, "categories", e).await,
        };
        let streams = match self.client.get_live_streams(creds).await {
            Ok(streams) => streams,
            Err(e) => return self.fail_catalog(kind, source_id, name, "streams", e).await,
        };

        let categories = finalize_categories(categories, &streams);
        stats.category_count = categories.len();
        stats.channel_count = streams.len();

        if let Err(e) = self
            .persist_catalog(kind, source_id, &categories, &streams)
            .await
        {
            let error = format!("Failed to persist catalog: {e}");
            warn!("{kind} source '{name}': {error}");
            if let Err(e) = self
                .database
                .record_refresh_error(kind, source_id, &error)
                .await
            {
                warn!("Failed to record refresh error for '{name}': {e}");
            }
            return RefreshOutcome::Failed(error);
        }

        // Stage 3: EPG, best-effort. A failure leaves the previous payload.
        match self.fetch_and_store_epg(kind, source_id, creds).await {
            Ok((channel_count, program_count)) => {
                stats.epg_channel_count = channel_count;
                stats.epg_program_count = program_count;
            }
            Err(e) => {
                warn!("{kind} source '{name}': EPG refresh failed, keeping prior data: {e}");
            }
        }

        // Stage 4: VOD, best-effort; many sources expose none
        match self.fetch_and_store_vod(kind, source_id, creds).await {
            Ok(count) => stats.vod_count = count,
            Err(e) => {
                warn!("{kind} source '{name}': VOD refresh failed, keeping prior data: {e}");
            }
        }

        // Stage 5: series, best-effort
        match self.fetch_and_store_series(kind, source_id, creds).await {
            Ok(count) => stats.series_count = count,
            Err(e) => {
                warn!("{kind} source '{name}': series refresh failed, keeping prior data: {e}");
            }
        }

        info!(
            "Refresh completed for {kind} source '{name}' in {}s: {} categories, {} channels, {} EPG channels, {} programs, {} VOD, {} series",
            (Utc::now() - started).num_seconds(),
            stats.category_count,
            stats.channel_count,
            stats.epg_channel_count,
            stats.epg_program_count,
            stats.vod_count,
            stats.series_count,
        );
        RefreshOutcome::Success(stats)
    }

    async fn fail_catalog(
        &self,
        kind: SourceKind,
        source_id: i64,
        name: &str,
        what: &str,
        e: crate::errors::AppError,
    ) -> RefreshOutcome {
        let error = format!("Failed to fetch live {what}: {e}");
        warn!("{kind} source '{name}': {error}");
        if let Err(e) = self
            .database
            .record_refresh_error(kind, source_id, &error)
            .await
        {
            warn!("Failed to record refresh error for '{name}': {e}");
        }
        RefreshOutcome::Failed(error)
    }

    async fn persist_catalog(
        &self,
        kind: SourceKind,
        source_id: i64,
        categories: &[Category],
        streams: &[LiveStream],
    ) -> Result<()> {
        let categories_json = serde_json::to_string(categories)?;
        let channels_json = serde_json::to_string(streams)?;
        self.database
            .upsert_catalog(
                kind,
                source_id,
                &categories_json,
                &channels_json,
                categories.len() as i64,
                streams.len() as i64,
            )
            .await
    }

    async fn fetch_and_store_epg(
        &self,
        kind: SourceKind,
        source_id: i64,
        creds: &XtreamCredentials,
    ) -> Result<(usize, usize)> {
        let content = self.client.fetch_xmltv(creds).await?;
        let epg = parse_guide(&content, self.epg_retention_days, Utc::now())?;
        let epg_json = serde_json::to_string(&epg)?;
        self.database
            .upsert_epg(
                kind,
                source_id,
                &epg_json,
                epg.channel_count(),
                epg.program_count(),
            )
            .await?;
        Ok((epg.channels.len(), epg.programs.len()))
    }

    async fn fetch_and_store_vod(
        &self,
        kind: SourceKind,
        source_id: i64,
        creds: &XtreamCredentials,
    ) -> Result<usize> {
        let categories = self.client.get_vod_categories(creds).await?;
        let streams = self.client.get_vod_streams(creds).await?;
        let categories_json = serde_json::to_string(&categories)?;
        let streams_json = serde_json::to_string(&streams)?;
        self.database
            .upsert_vod(kind, source_id, &categories_json, &streams_json)
            .await?;
        Ok(streams.len())
    }

    async fn fetch_and_store_series(
        &self,
        kind: SourceKind,
        source_id: i64,
        creds: &XtreamCredentials,
    ) -> Result<usize> {
        let categories = self.client.get_series_categories(creds).await?;
        let series = self.client.get_series(creds).await?;
        let categories_json = serde_json::to_string(&categories)?;
        let series_json = serde_json::to_string(&series)?;
        self.database
            .upsert_series(kind, source_id, &categories_json, &series_json)
            .await?;
        Ok(series.len())
    }
}

/// Fill per-category channel counts and inject the synthetic `"all"`
/// category carrying the source's total stream count.
pub(crate) fn finalize_categories(
    categories: Vec<Category>,
    streams: &[LiveStream],
) -> Vec<Category> {
    let mut counted: Vec<Category> = categories
        .into_iter()
        .map(|mut category| {
            category.channel_count = streams
                .iter()
                .filter(|s| s.category_id == category.category_id)
                .count() as i64;
            category
        })
        .collect();

    counted.insert(
        0,
        Category {
            category_id: ALL_CATEGORY_ID.to_string(),
            category_name: "All Channels".to_string(),
            channel_count: streams.len() as i64,
        },
    );
    counted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LiveStream;

    fn stream(id: &str, category: &str) -> LiveStream {
        LiveStream {
            stream_id: id.to_string(),
            name: format!("Stream {id}"),
            icon: None,
            category_id: category.to_string(),
            epg_channel_id: None,
            is_adult: false,
        }
    }

    #[test]
    fn test_finalize_categories_counts_and_all() {
        let categories = vec![
            Category {
                category_id: "news".to_string(),
                category_name: "News".to_string(),
                channel_count: 0,
            },
            Category {
                category_id: "sports".to_string(),
                category_name: "Sports".to_string(),
                channel_count: 0,
            },
        ];
        let streams = vec![
            stream("1", "news"),
            stream("2", "news"),
            stream("3", "sports"),
            stream("4", "docs"),
        ];

        let finalized = finalize_categories(categories, &streams);
        assert_eq!(finalized.len(), 3);
        assert_eq!(finalized[0].category_id, ALL_CATEGORY_ID);
        // "all" reflects the source total, not the sum of listed categories
        assert_eq!(finalized[0].channel_count, 4);
        assert_eq!(finalized[1].channel_count, 2);
        assert_eq!(finalized[2].channel_count, 1);
    }
}
