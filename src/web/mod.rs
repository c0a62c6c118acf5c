//! Web layer
//!
//! Thin axum handlers over the service layer. The session layer in front of
//! this service authenticates callers and forwards the user id in the
//! `X-User-Id` header; handlers never see raw session state.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

use crate::{
    config::Config,
    database::Database,
    ingestor::{RefreshService, SchedulerSender},
    services::{GuideCache, GuideService},
};

pub mod api;
pub mod extractors;

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(
        config: Config,
        database: Database,
        cache: GuideCache,
        guide_service: GuideService,
        refresh_service: RefreshService,
        scheduler_tx: SchedulerSender,
    ) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;
        let app = Self::create_router(AppState {
            database,
            config,
            cache,
            guide_service,
            refresh_service,
            scheduler_tx,
        });

        Ok(Self { app, addr })
    }

    fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(api::health))
            .nest("/api/v1", Self::api_v1_routes())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    fn api_v1_routes() -> Router<AppState> {
        Router::new()
            // User-facing guide reads
            .route("/guide", get(api::get_guide))
            .route("/guide/channels/:category_id", get(api::get_guide_channels))
            .route("/guide/short-epg/:stream_id", get(api::get_short_epg))
            .route("/guide/refresh", post(api::refresh_own_sources))
            // Cache administration
            .route("/cache/status", get(api::cache_status))
            .route("/cache/refresh", post(api::trigger_full_refresh))
            .route(
                "/playlists/:id/schedule-refresh",
                post(api::schedule_playlist_refresh),
            )
    }

    /// Start the web server
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub config: Config,
    pub cache: GuideCache,
    pub guide_service: GuideService,
    pub refresh_service: RefreshService,
    pub scheduler_tx: SchedulerSender,
}
