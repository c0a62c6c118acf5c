//! Refresh scheduling and cache reload coordination
//!
//! The scheduler owns all mutable refresh state: the cron trigger for full
//! catalog refreshes, the map of pending debounced playlist timers, and the
//! post-refresh reload of the in-process guide cache. It is constructed once
//! at startup; other components talk to it through its event sender.

use anyhow::Result;
use chrono::Utc;
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::models::ipc::{WorkerCommand, WorkerCommandKind};
use crate::models::SourceKind;
use crate::services::guide_cache::GuideCache;

use super::worker::spawn_refresh_worker;

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Immediate full refresh in an isolated worker
    RefreshAll,
    RefreshPanel(i64),
    RefreshPlaylist(i64),
    /// A playlist-management action finished; refresh after the debounce
    /// delay, restarting the timer if re-triggered
    PlaylistActionCompleted(i64),
    Shutdown,
}

pub type SchedulerSender = mpsc::UnboundedSender<SchedulerEvent>;

pub struct SchedulerService {
    database: Database,
    config: Config,
    config_path: String,
    cache: GuideCache,
    event_tx: SchedulerSender,
    event_rx: Option<mpsc::UnboundedReceiver<SchedulerEvent>>,
    pending_playlist_refreshes: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
}

impl SchedulerService {
    pub fn new(database: Database, config: Config, config_path: String, cache: GuideCache) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            database,
            config,
            config_path,
            cache,
            event_tx,
            event_rx: Some(event_rx),
            pending_playlist_refreshes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Event sender for components that need to trigger refreshes
    pub fn event_sender(&self) -> SchedulerSender {
        self.event_tx.clone()
    }

    pub async fn start(mut self) -> Result<()> {
        let schedule = Schedule::from_str(&self.config.ingestion.refresh_cron).map_err(|e| {
            anyhow::anyhow!(
                "Invalid refresh cron expression '{}': {e}",
                self.config.ingestion.refresh_cron
            )
        })?;
        let mut event_rx = self
            .event_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("Scheduler already started"))?;

        if let Some(next) = schedule.upcoming(Utc).next() {
            info!(
                "Scheduler started; next full refresh at {}",
                next.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        loop {
            let wake = next_wake_instant(&schedule);

            tokio::select! {
                _ = sleep_until(wake) => {
                    info!("Scheduled full catalog refresh triggered");
                    self.run_worker_refresh(WorkerCommand::full_refresh()).await;
                }

                Some(event) = event_rx.recv() => {
                    debug!("Scheduler event: {:?}", event);
                    match event {
                        SchedulerEvent::RefreshAll => {
                            self.run_worker_refresh(WorkerCommand::full_refresh()).await;
                        }
                        SchedulerEvent::RefreshPanel(panel_id) => {
                            self.run_worker_refresh(WorkerCommand::refresh_panel(panel_id)).await;
                        }
                        SchedulerEvent::RefreshPlaylist(playlist_id) => {
                            self.run_worker_refresh(WorkerCommand::refresh_playlist(playlist_id)).await;
                        }
                        SchedulerEvent::PlaylistActionCompleted(playlist_id) => {
                            self.schedule_playlist_refresh(playlist_id).await;
                        }
                        SchedulerEvent::Shutdown => {
                            info!("Scheduler shutting down");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Run one refresh in an isolated worker process and reload the affected
    /// cache slice afterwards. Worker failures are reported, never propagated:
    /// the next cycle retries.
    async fn run_worker_refresh(&self, command: WorkerCommand) {
        match spawn_refresh_worker(&command, &self.config_path).await {
            Ok(report) => {
                if report.success {
                    if let Some(summary) = &report.summary {
                        info!(
                            "Worker refresh finished: {}/{} succeeded, {} failed, {} skipped",
                            summary.success, summary.total, summary.failed, summary.skipped
                        );
                    }
                } else {
                    error!(
                        "Worker refresh failed: {}",
                        report.error.as_deref().unwrap_or("unknown error")
                    );
                }
                // Reload regardless: even a partially failed cycle may have
                // advanced some snapshots
                self.reload_cache_for(&command).await;
            }
            Err(e) => {
                error!("Failed to run refresh worker: {e}");
            }
        }
    }

    /// Reload the in-process cache for the sources a command covered, with
    /// small jittered pauses so a batch reload does not starve readers.
    async fn reload_cache_for(&self, command: &WorkerCommand) {
        let targets = match self.reload_targets(command).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!("Failed to enumerate cache reload targets: {e}");
                return;
            }
        };

        let delay_ms = self.config.cache.reload_delay_ms;
        for (i, (kind, source_id)) in targets.iter().enumerate() {
            if i > 0 {
                let jitter = fastrand::u64(0..delay_ms.max(1));
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
            }
            if let Err(e) = self.cache.reload(&self.database, *kind, *source_id).await {
                warn!("Cache reload failed for ({kind}, {source_id}): {e}");
            }
        }
        debug!("Reloaded {} cache entries", targets.len());
    }

    async fn reload_targets(&self, command: &WorkerCommand) -> Result<Vec<(SourceKind, i64)>> {
        Ok(match command.command {
            WorkerCommandKind::RefreshPanel => command
                .panel_id
                .map(|id| vec![(SourceKind::Panel, id)])
                .unwrap_or_default(),
            WorkerCommandKind::RefreshPlaylist => command
                .playlist_id
                .map(|id| vec![(SourceKind::Playlist, id)])
                .unwrap_or_default(),
            WorkerCommandKind::RefreshAllPanels => self
                .database
                .list_active_panels()
                .await?
                .iter()
                .map(|p| (SourceKind::Panel, p.id))
                .collect(),
            WorkerCommandKind::RefreshAllPlaylists => self
                .database
                .list_active_playlists()
                .await?
                .iter()
                .map(|p| (SourceKind::Playlist, p.id))
                .collect(),
            WorkerCommandKind::FullRefresh => {
                let mut targets: Vec<(SourceKind, i64)> = self
                    .database
                    .list_active_panels()
                    .await?
                    .iter()
                    .map(|p| (SourceKind::Panel, p.id))
                    .collect();
                targets.extend(
                    self.database
                        .list_active_playlists()
                        .await?
                        .iter()
                        .map(|p| (SourceKind::Playlist, p.id)),
                );
                targets
            }
        })
    }

    /// Debounce a playlist refresh: one pending timer per playlist, restarted
    /// on re-trigger rather than fanned out.
    async fn schedule_playlist_refresh(&self, playlist_id: i64) {
        let delay = Duration::from_secs(self.config.ingestion.playlist_refresh_delay_secs);
        let event_tx = self.event_tx.clone();
        let pending = self.pending_playlist_refreshes.clone();

        let mut timers = self.pending_playlist_refreshes.lock().await;
        if let Some(previous) = timers.remove(&playlist_id) {
            previous.abort();
            debug!("Restarted pending refresh timer for playlist {playlist_id}");
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.lock().await.remove(&playlist_id);
            let _ = event_tx.send(SchedulerEvent::RefreshPlaylist(playlist_id));
        });
        timers.insert(playlist_id, handle);

        info!(
            "Playlist {playlist_id} refresh scheduled in {}s",
            delay.as_secs()
        );
    }

    /// Number of playlist refresh timers currently pending
    pub async fn pending_playlist_refresh_count(&self) -> usize {
        self.pending_playlist_refreshes.lock().await.len()
    }
}

fn next_wake_instant(schedule: &Schedule) -> Instant {
    let now = Utc::now();
    let sleep_duration = schedule
        .upcoming(Utc)
        .next()
        .and_then(|next| next.signed_duration_since(now).to_std().ok())
        .unwrap_or(Duration::from_secs(3600))
        .max(Duration::from_secs(1));
    Instant::now() + sleep_duration
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_scheduler() -> SchedulerService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let database = Database::from_pool(pool);
        let config = Config::default();
        let cache = GuideCache::new(config.cache.ttl_secs);
        SchedulerService::new(database, config, "config.toml".to_string(), cache)
    }

    #[tokio::test]
    async fn test_playlist_debounce_replaces_pending_timer() {
        let scheduler = test_scheduler().await;

        scheduler.schedule_playlist_refresh(7).await;
        scheduler.schedule_playlist_refresh(9).await;
        assert_eq!(scheduler.pending_playlist_refresh_count().await, 2);

        // Re-triggering playlist 7 replaces its timer instead of adding one
        scheduler.schedule_playlist_refresh(7).await;
        assert_eq!(scheduler.pending_playlist_refresh_count().await, 2);
    }

    #[test]
    fn test_default_cron_parses() {
        let config = Config::default();
        assert!(Schedule::from_str(&config.ingestion.refresh_cron).is_ok());
    }
}
