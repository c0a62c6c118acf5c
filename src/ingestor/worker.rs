//! Out-of-process refresh worker
//!
//! Full refreshes parse multi-MB guide documents and walk dozens of HTTP
//! calls; running them inside the request-serving process would stall live
//! reads. The scheduler instead spawns this binary with the `worker`
//! subcommand, writes one command object to its stdin and consumes
//! line-delimited JSON messages until the child exits:
//! `ready → status*/progress* → complete|error`.
//!
//! The worker logs to stderr; stdout carries protocol messages only.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::database::Database;
use crate::models::ipc::{WorkerCommand, WorkerCommandKind, WorkerMessage};
use crate::models::{RefreshOutcome, RefreshSummary};

use super::refresh::RefreshService;

/// Outcome of one worker run, as observed by the parent. A crash or an exit
/// without a terminal message resolves to a report with `success: false`;
/// the caller's future always completes.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub success: bool,
    pub summary: Option<RefreshSummary>,
    pub error: Option<String>,
    pub message: String,
}

impl WorkerReport {
    fn synthetic_failure(detail: String) -> Self {
        Self {
            success: false,
            summary: None,
            error: Some(detail.clone()),
            message: detail,
        }
    }
}

/// Parent side: spawn one worker for one command and collect its report
pub async fn spawn_refresh_worker(
    command: &WorkerCommand,
    config_path: &str,
) -> Result<WorkerReport> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    info!("Spawning refresh worker for {:?}", command.command);

    let mut child = Command::new(exe)
        .arg("--config")
        .arg(config_path)
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .context("failed to spawn refresh worker")?;

    let mut stdin = child
        .stdin
        .take()
        .context("worker stdin unavailable")?;
    let stdout = child
        .stdout
        .take()
        .context("worker stdout unavailable")?;

    let command_line = serde_json::to_string(command)?;
    let mut lines = BufReader::new(stdout).lines();
    let mut report: Option<WorkerReport> = None;

    while let Some(line) = lines.next_line().await? {
        let message: WorkerMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(_) => {
                debug!("Ignoring non-protocol worker output: {line}");
                continue;
            }
        };

        match message {
            WorkerMessage::Ready => {
                stdin.write_all(command_line.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await?;
            }
            WorkerMessage::Status { message } => {
                debug!("Worker status: {message}");
            }
            WorkerMessage::Progress {
                stage,
                success,
                total,
                failed,
            } => {
                debug!("Worker progress [{stage}]: {success}/{total} ok, {failed} failed");
            }
            WorkerMessage::Complete { summary, message } => {
                report = Some(WorkerReport {
                    success: true,
                    summary: Some(summary),
                    error: None,
                    message,
                });
            }
            WorkerMessage::Error { error: err, message } => {
                report = Some(WorkerReport {
                    success: false,
                    summary: None,
                    error: Some(err),
                    message,
                });
            }
        }
    }

    let status = child.wait().await?;

    // A worker that died without a terminal message is a failure, not a hang
    match report {
        Some(report) => Ok(report),
        None => {
            let detail = format!(
                "Refresh worker exited with {status} before sending complete/error"
            );
            error!("{detail}");
            Ok(WorkerReport::synthetic_failure(detail))
        }
    }
}

/// Child side: announce readiness, execute exactly one command, exit
pub async fn run_worker(config: Config) -> Result<()> {
    emit(&WorkerMessage::Ready)?;

    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    reader
        .read_line(&mut line)
        .await
        .context("failed to read command from stdin")?;

    let command: WorkerCommand = match serde_json::from_str(line.trim()) {
        Ok(command) => command,
        Err(e) => {
            emit(&WorkerMessage::Error {
                error: format!("Invalid command: {e}"),
                message: "Worker received an unparseable command".to_string(),
            })?;
            return Ok(());
        }
    };

    let database = Database::new(&config.database).await?;
    let refresh = RefreshService::new(database, &config);

    match execute_command(&refresh, &command).await {
        Ok(message) => emit(&message)?,
        Err(e) => {
            emit(&WorkerMessage::Error {
                error: e.to_string(),
                message: "Refresh worker failed".to_string(),
            })?;
        }
    }
    Ok(())
}

async fn execute_command(
    refresh: &RefreshService,
    command: &WorkerCommand,
) -> Result<WorkerMessage> {
    match command.command {
        WorkerCommandKind::FullRefresh => {
            emit(&WorkerMessage::Status {
                message: "Starting full catalog refresh".to_string(),
            })?;
            let panels = refresh.refresh_all_panels(progress_reporter("panels")).await?;
            let playlists = refresh
                .refresh_all_playlists(progress_reporter("playlists"))
                .await?;
            let mut summary = panels;
            summary.merge(&playlists);
            Ok(complete(summary, "Full refresh finished"))
        }
        WorkerCommandKind::RefreshAllPanels => {
            let summary = refresh.refresh_all_panels(progress_reporter("panels")).await?;
            Ok(complete(summary, "Panel refresh finished"))
        }
        WorkerCommandKind::RefreshAllPlaylists => {
            let summary = refresh
                .refresh_all_playlists(progress_reporter("playlists"))
                .await?;
            Ok(complete(summary, "Playlist refresh finished"))
        }
        WorkerCommandKind::RefreshPanel => {
            let panel_id = command
                .panel_id
                .ok_or_else(|| anyhow::anyhow!("refreshPanel requires panelId"))?;
            Ok(single_outcome_message(
                refresh.refresh_panel_by_id(panel_id).await?,
                &format!("panel {panel_id}"),
            ))
        }
        WorkerCommandKind::RefreshPlaylist => {
            let playlist_id = command
                .playlist_id
                .ok_or_else(|| anyhow::anyhow!("refreshPlaylist requires playlistId"))?;
            Ok(single_outcome_message(
                refresh.refresh_playlist_by_id(playlist_id).await?,
                &format!("playlist {playlist_id}"),
            ))
        }
    }
}

fn complete(summary: RefreshSummary, message: &str) -> WorkerMessage {
    WorkerMessage::Complete {
        summary,
        message: message.to_string(),
    }
}

fn single_outcome_message(outcome: RefreshOutcome, what: &str) -> WorkerMessage {
    match outcome {
        RefreshOutcome::Success(_) => {
            let summary = RefreshSummary {
                total: 1,
                success: 1,
                ..Default::default()
            };
            complete(summary, &format!("Refreshed {what}"))
        }
        RefreshOutcome::Failed(error) => WorkerMessage::Error {
            error,
            message: format!("Refresh failed for {what}"),
        },
        RefreshOutcome::Skipped(reason) => WorkerMessage::Error {
            error: reason,
            message: format!("Refresh skipped for {what}"),
        },
    }
}

/// Per-source progress emitter for the bulk commands. Emission failures are
/// swallowed; a broken pipe surfaces at the terminal message instead.
fn progress_reporter(stage: &'static str) -> impl FnMut(&RefreshSummary) {
    move |summary: &RefreshSummary| {
        let _ = emit(&WorkerMessage::Progress {
            stage: stage.to_string(),
            success: summary.success,
            total: summary.total,
            failed: summary.failed,
        });
    }
}

/// Write one protocol message as a single stdout line
fn emit(message: &WorkerMessage) -> Result<()> {
    use std::io::Write;

    let line = serde_json::to_string(message)?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{line}")?;
    handle.flush()?;
    Ok(())
}
