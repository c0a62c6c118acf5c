//! Entitlement-filtered guide reads
//!
//! The cached snapshot reflects the admin credentials used for bulk caching
//! and is never trusted as an access list. Every guide read makes one
//! lightweight live call with the requesting user's own credentials and
//! serves only the intersection of the cached catalog with that user's
//! authorized categories, with playback URLs personalized to the user.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::config::GuideConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult, SourceError};
use crate::models::{
    Category, EpgData, EpgProgram, GuideChannel, GuideResponse, GuideSourceSelector, LiveStream,
    SourceKind, ALL_CATEGORY_ID,
};
use crate::sources::credentials::{derive_panel_credentials, derive_playlist_credentials};
use crate::sources::xtream::build_stream_url;
use crate::sources::{XtreamClient, XtreamCredentials};

use super::guide_cache::GuideCache;

const DEFAULT_STREAM_EXTENSION: &str = "ts";
const SHORT_EPG_DEFAULT_LIMIT: u32 = 10;

/// A user's request resolved to a concrete source and personal credentials
#[derive(Debug, Clone)]
pub struct ResolvedLine {
    pub kind: SourceKind,
    pub source_id: i64,
    pub credentials: XtreamCredentials,
}

/// Outcome of a guide read
pub enum GuideRead {
    /// No snapshot exists yet; the caller should trigger a refresh rather
    /// than wait on a cold multi-minute fetch
    NotCached,
    Ready(Box<GuideResponse>),
}

#[derive(Clone)]
pub struct GuideService {
    database: Database,
    cache: GuideCache,
    client: XtreamClient,
    config: GuideConfig,
}

impl GuideService {
    pub fn new(
        database: Database,
        cache: GuideCache,
        client: XtreamClient,
        config: GuideConfig,
    ) -> Self {
        Self {
            database,
            cache,
            client,
            config,
        }
    }

    /// Resolve which source and credentials serve a user's guide request
    pub async fn resolve_line(
        &self,
        user_id: i64,
        selector: GuideSourceSelector,
    ) -> AppResult<ResolvedLine> {
        let line = self
            .database
            .get_user_line(user_id)
            .await
            .map_err(|e| AppError::internal(e.to_string()))?
            .ok_or_else(|| AppError::not_found("user line", user_id.to_string()))?;

        match selector {
            GuideSourceSelector::Direct => {
                let panel_id = line
                    .panel_id
                    .ok_or_else(|| AppError::validation("User has no direct panel line"))?;
                let username = line
                    .panel_username
                    .ok_or_else(|| AppError::validation("Panel line has no username"))?;
                let password = line
                    .panel_password
                    .ok_or_else(|| AppError::validation("Panel line has no password"))?;

                let panel = self
                    .database
                    .get_panel(panel_id)
                    .await
                    .map_err(|e| AppError::internal(e.to_string()))?
                    .ok_or_else(|| AppError::not_found("panel", panel_id.to_string()))?;

                // The user's line lives on the same backend the admin
                // credentials resolve to
                let base_url = derive_panel_credentials(&panel)
                    .map(|creds| creds.base_url)
                    .or_else(|| {
                        panel
                            .api_url
                            .as_deref()
                            .map(|url| url.trim_end_matches('/').to_string())
                    })
                    .ok_or_else(|| {
                        AppError::configuration(format!("Panel '{}' has no API URL", panel.name))
                    })?;

                Ok(ResolvedLine {
                    kind: SourceKind::Panel,
                    source_id: panel_id,
                    credentials: XtreamCredentials::new(base_url, username, password),
                })
            }
            GuideSourceSelector::Editor => {
                let playlist_id = line
                    .playlist_id
                    .ok_or_else(|| AppError::validation("User has no playlist line"))?;
                let playlist = self
                    .database
                    .get_playlist(playlist_id)
                    .await
                    .map_err(|e| AppError::internal(e.to_string()))?
                    .ok_or_else(|| AppError::not_found("playlist", playlist_id.to_string()))?;

                let gateway_url = self.config.playlist_gateway_url.as_deref().ok_or_else(|| {
                    AppError::configuration("No playlist gateway URL configured")
                })?;
                let credentials = derive_playlist_credentials(&playlist, gateway_url)
                    .ok_or_else(|| {
                        AppError::validation(format!(
                            "Playlist '{}' has no guide credentials",
                            playlist.name
                        ))
                    })?;

                Ok(ResolvedLine {
                    kind: SourceKind::Playlist,
                    source_id: playlist_id,
                    credentials,
                })
            }
        }
    }

    /// Build the filtered guide for one user
    pub async fn build_guide(
        &self,
        user_id: i64,
        selector: GuideSourceSelector,
        category_filter: Option<&str>,
    ) -> AppResult<GuideRead> {
        let line = self.resolve_line(user_id, selector).await?;

        let Some(cached) = self
            .cache
            .get(&self.database, line.kind, line.source_id)
            .await
            .map_err(|e| AppError::internal(e.to_string()))?
        else {
            return Ok(GuideRead::NotCached);
        };

        let entitled = self.fetch_entitled_categories(&line.credentials).await?;

        let categories = filter_categories(&cached.categories, entitled.as_ref());
        let channels = filter_channels(&cached.channels, entitled.as_ref(), category_filter);
        let channels = self.personalize(&line.credentials, channels);

        // EPG only for a concrete category filter; an all-channels EPG
        // payload is too large to serve inline
        let epg = match category_filter {
            Some(filter) if filter != ALL_CATEGORY_ID => cached
                .epg
                .as_ref()
                .map(|epg| build_epg_slice(epg, &channels)),
            _ => None,
        };
        let epg_channel_count = epg.as_ref().map(|slice| slice.len()).unwrap_or(0);

        Ok(GuideRead::Ready(Box::new(GuideResponse {
            total_categories: categories.len(),
            total_channels: channels.len(),
            categories,
            channels,
            cache_last_updated: cached.last_updated,
            epg,
            epg_channel_count,
        })))
    }

    /// Lazily load one category's channel list with personalized URLs
    pub async fn category_channels(
        &self,
        user_id: i64,
        selector: GuideSourceSelector,
        category_id: &str,
    ) -> AppResult<Option<Vec<GuideChannel>>> {
        let line = self.resolve_line(user_id, selector).await?;

        let Some(cached) = self
            .cache
            .get(&self.database, line.kind, line.source_id)
            .await
            .map_err(|e| AppError::internal(e.to_string()))?
        else {
            return Ok(None);
        };

        let entitled = self.fetch_entitled_categories(&line.credentials).await?;
        let channels = filter_channels(&cached.channels, entitled.as_ref(), Some(category_id));
        Ok(Some(self.personalize(&line.credentials, channels)))
    }

    /// Short-EPG passthrough for one stream, fetched live with the user's
    /// own credentials
    pub async fn short_epg(
        &self,
        user_id: i64,
        selector: GuideSourceSelector,
        stream_id: &str,
        limit: Option<u32>,
    ) -> AppResult<serde_json::Value> {
        let line = self.resolve_line(user_id, selector).await?;
        self.client
            .get_short_epg(
                &line.credentials,
                stream_id,
                limit.unwrap_or(SHORT_EPG_DEFAULT_LIMIT),
            )
            .await
    }

    /// Live entitlement check. `None` means "all cached categories visible":
    /// either the call succeeded trivially or it failed and the configured
    /// policy is fail-open.
    async fn fetch_entitled_categories(
        &self,
        credentials: &XtreamCredentials,
    ) -> AppResult<Option<HashSet<String>>> {
        match self.client.get_live_categories(credentials).await {
            Ok(categories) => {
                debug!(
                    "Entitlement check resolved {} categories for user '{}'",
                    categories.len(),
                    credentials.username
                );
                Ok(Some(
                    categories.into_iter().map(|c| c.category_id).collect(),
                ))
            }
            Err(e) if self.config.entitlement_fail_open => {
                warn!(
                    "Entitlement check failed for user '{}', serving all cached categories: {e}",
                    credentials.username
                );
                Ok(None)
            }
            Err(e) => Err(AppError::Source(SourceError::auth_failed(
                "xtream",
                format!("entitlement check failed: {e}"),
            ))),
        }
    }

    fn personalize(
        &self,
        credentials: &XtreamCredentials,
        channels: Vec<LiveStream>,
    ) -> Vec<GuideChannel> {
        channels
            .into_iter()
            .map(|stream| GuideChannel {
                url: build_stream_url(
                    &credentials.base_url,
                    &credentials.username,
                    &credentials.password,
                    &stream.stream_id,
                    DEFAULT_STREAM_EXTENSION,
                ),
                stream,
            })
            .collect()
    }
}

/// Keep categories the user is entitled to. The synthetic `"all"` category
/// always passes and keeps its cached (admin-total) channel count.
pub(crate) fn filter_categories(
    categories: &[Category],
    entitled: Option<&HashSet<String>>,
) -> Vec<Category> {
    categories
        .iter()
        .filter(|category| {
            category.category_id == ALL_CATEGORY_ID
                || entitled.is_none_or(|set| set.contains(&category.category_id))
        })
        .cloned()
        .collect()
}

/// Filter channels by the entitled category set intersected with an explicit
/// category filter (`"all"` meaning no restriction)
pub(crate) fn filter_channels(
    channels: &[LiveStream],
    entitled: Option<&HashSet<String>>,
    category_filter: Option<&str>,
) -> Vec<LiveStream> {
    channels
        .iter()
        .filter(|channel| entitled.is_none_or(|set| set.contains(&channel.category_id)))
        .filter(|channel| match category_filter {
            Some(filter) if filter != ALL_CATEGORY_ID => channel.category_id == filter,
            _ => true,
        })
        .cloned()
        .collect()
}

/// Slice the grouped EPG index down to the channels actually returned
fn build_epg_slice(
    epg: &EpgData,
    channels: &[GuideChannel],
) -> BTreeMap<String, Vec<EpgProgram>> {
    let mut slice = BTreeMap::new();
    for channel in channels {
        let Some(epg_id) = channel.stream.epg_channel_id.as_deref() else {
            continue;
        };
        if let Some(programs) = epg.programs_by_channel.get(epg_id) {
            slice.insert(epg_id.to_string(), programs.clone());
        }
    }
    slice
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: &str, count: i64) -> Category {
        Category {
            category_id: id.to_string(),
            category_name: id.to_uppercase(),
            channel_count: count,
        }
    }

    fn stream(id: &str, category: &str) -> LiveStream {
        LiveStream {
            stream_id: id.to_string(),
            name: format!("Stream {id}"),
            icon: None,
            category_id: category.to_string(),
            epg_channel_id: Some(format!("{id}.epg")),
            is_adult: false,
        }
    }

    #[test]
    fn test_entitlement_intersection() {
        // Cached: 3 categories (news, sports, all) and 40 channels total
        let categories = vec![category("all", 40), category("news", 15), category("sports", 25)];
        let mut channels = Vec::new();
        for i in 0..15 {
            channels.push(stream(&format!("n{i}"), "news"));
        }
        for i in 0..25 {
            channels.push(stream(&format!("s{i}"), "sports"));
        }

        let entitled: HashSet<String> = ["news".to_string()].into_iter().collect();

        let filtered_categories = filter_categories(&categories, Some(&entitled));
        // "all" is retained with the admin total, sports is dropped
        assert_eq!(filtered_categories.len(), 2);
        assert_eq!(filtered_categories[0].category_id, "all");
        assert_eq!(filtered_categories[0].channel_count, 40);
        assert_eq!(filtered_categories[1].category_id, "news");

        // No explicit filter: only entitled channels come back
        let filtered = filter_channels(&channels, Some(&entitled), None);
        assert_eq!(filtered.len(), 15);
        assert!(filtered.iter().all(|c| c.category_id == "news"));
    }

    #[test]
    fn test_explicit_category_filter_intersects() {
        let channels = vec![stream("1", "news"), stream("2", "sports"), stream("3", "news")];
        let entitled: HashSet<String> =
            ["news".to_string(), "sports".to_string()].into_iter().collect();

        let filtered = filter_channels(&channels, Some(&entitled), Some("sports"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].stream_id, "2");

        // "all" filter imposes no category restriction
        let filtered = filter_channels(&channels, Some(&entitled), Some(ALL_CATEGORY_ID));
        assert_eq!(filtered.len(), 3);

        // Entitlement still applies under an explicit filter
        let news_only: HashSet<String> = ["news".to_string()].into_iter().collect();
        let filtered = filter_channels(&channels, Some(&news_only), Some("sports"));
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_fail_open_shows_everything() {
        let categories = vec![category("all", 2), category("news", 1), category("vip", 1)];
        let channels = vec![stream("1", "news"), stream("2", "vip")];

        // None = entitlement unknown (fail-open): everything stays visible
        assert_eq!(filter_categories(&categories, None).len(), 3);
        assert_eq!(filter_channels(&channels, None, None).len(), 2);
    }
}
