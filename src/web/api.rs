use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::extractors::UserId;
use super::AppState;
use crate::errors::{AppError, SourceError};
use crate::ingestor::SchedulerEvent;
use crate::models::{
    GuideSourceSelector, NotCachedResponse, RefreshOutcome, RefreshResponse, RefreshSummary,
    SnapshotStatus, SourceKind,
};
use crate::services::GuideRead;

#[derive(Debug, Deserialize)]
pub struct GuideQueryParams {
    pub source: Option<GuideSourceSelector>,
    pub category_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShortEpgQueryParams {
    pub source: Option<GuideSourceSelector>,
    pub limit: Option<u32>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "guide-cache" }))
}

/// The entitlement-filtered guide for the calling user
pub async fn get_guide(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(params): Query<GuideQueryParams>,
) -> Result<Response, StatusCode> {
    let selector = params.source.unwrap_or(GuideSourceSelector::Direct);

    match state
        .guide_service
        .build_guide(user_id, selector, params.category_id.as_deref())
        .await
    {
        Ok(GuideRead::Ready(response)) => Ok(Json(*response).into_response()),
        Ok(GuideRead::NotCached) => {
            Ok((StatusCode::OK, Json(NotCachedResponse::new())).into_response())
        }
        Err(e) => {
            error!("Guide read failed for user {user_id}: {e}");
            Err(error_status(&e))
        }
    }
}

/// Lazily load one category's channel list with personalized URLs
pub async fn get_guide_channels(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(category_id): Path<String>,
    Query(params): Query<GuideQueryParams>,
) -> Result<Response, StatusCode> {
    let selector = params.source.unwrap_or(GuideSourceSelector::Direct);

    match state
        .guide_service
        .category_channels(user_id, selector, &category_id)
        .await
    {
        Ok(Some(channels)) => Ok(Json(channels).into_response()),
        Ok(None) => Ok((StatusCode::OK, Json(NotCachedResponse::new())).into_response()),
        Err(e) => {
            error!("Category channel read failed for user {user_id}: {e}");
            Err(error_status(&e))
        }
    }
}

/// Short-EPG passthrough for one stream
pub async fn get_short_epg(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(stream_id): Path<String>,
    Query(params): Query<ShortEpgQueryParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let selector = params.source.unwrap_or(GuideSourceSelector::Direct);

    match state
        .guide_service
        .short_epg(user_id, selector, &stream_id, params.limit)
        .await
    {
        Ok(listing) => Ok(Json(listing)),
        Err(e) => {
            error!("Short EPG read failed for user {user_id}: {e}");
            Err(error_status(&e))
        }
    }
}

/// On-demand, in-process refresh of the caller's own source(s). Trades the
/// isolation of the worker path for responsiveness.
pub async fn refresh_own_sources(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<RefreshResponse>, StatusCode> {
    let line = match state.database.get_user_line(user_id).await {
        Ok(Some(line)) => line,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to load line for user {user_id}: {e}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let mut summary = RefreshSummary::default();
    let mut refreshed: Vec<(SourceKind, i64)> = Vec::new();

    if let Some(panel_id) = line.panel_id {
        match state.refresh_service.refresh_panel_by_id(panel_id).await {
            Ok(outcome) => {
                summary.record(&outcome);
                if matches!(outcome, RefreshOutcome::Success(_)) {
                    refreshed.push((SourceKind::Panel, panel_id));
                }
            }
            Err(e) => {
                error!("On-demand panel refresh failed for user {user_id}: {e}");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    if let Some(playlist_id) = line.playlist_id {
        match state
            .refresh_service
            .refresh_playlist_by_id(playlist_id)
            .await
        {
            Ok(outcome) => {
                summary.record(&outcome);
                if matches!(outcome, RefreshOutcome::Success(_)) {
                    refreshed.push((SourceKind::Playlist, playlist_id));
                }
            }
            Err(e) => {
                error!("On-demand playlist refresh failed for user {user_id}: {e}");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    if summary.total == 0 {
        return Err(StatusCode::NOT_FOUND);
    }

    for (kind, source_id) in refreshed {
        if let Err(e) = state.cache.reload(&state.database, kind, source_id).await {
            error!("Cache reload after on-demand refresh failed for ({kind}, {source_id}): {e}");
        }
    }

    info!(
        "On-demand refresh for user {user_id}: {}/{} succeeded",
        summary.success, summary.total
    );
    let success = summary.success > 0 && summary.failed == 0;
    Ok(Json(RefreshResponse {
        success,
        message: format!(
            "Refreshed {} source(s): {} succeeded, {} failed, {} skipped",
            summary.total, summary.success, summary.failed, summary.skipped
        ),
        summary,
    }))
}

/// Per-source snapshot freshness for the admin UI
pub async fn cache_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<SnapshotStatus>>, StatusCode> {
    match state.database.list_snapshots().await {
        Ok(snapshots) => Ok(Json(snapshots.iter().map(SnapshotStatus::from).collect())),
        Err(e) => {
            error!("Failed to list snapshots: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Queue a full catalog refresh in an isolated worker
pub async fn trigger_full_refresh(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    if state.scheduler_tx.send(SchedulerEvent::RefreshAll).is_err() {
        error!("Scheduler is not running; cannot queue full refresh");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Full refresh queued" })),
    ))
}

/// Schedule a debounced refresh after an external playlist-management action
pub async fn schedule_playlist_refresh(
    State(state): State<AppState>,
    Path(playlist_id): Path<i64>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    if state
        .scheduler_tx
        .send(SchedulerEvent::PlaylistActionCompleted(playlist_id))
        .is_err()
    {
        error!("Scheduler is not running; cannot schedule playlist refresh");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": format!("Playlist {playlist_id} refresh scheduled") })),
    ))
}

fn error_status(error: &AppError) -> StatusCode {
    match error {
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        AppError::Validation { .. } => StatusCode::BAD_REQUEST,
        AppError::Source(SourceError::AuthenticationFailed { .. }) => StatusCode::BAD_GATEWAY,
        AppError::Source(_) | AppError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
