//! Wire types for the parent/worker refresh protocol
//!
//! The parent writes exactly one command object to the worker's stdin as a
//! single JSON line; the worker answers with line-delimited messages and
//! exits. Field and variant spellings are part of the protocol.

use serde::{Deserialize, Serialize};

use super::RefreshSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerCommandKind {
    FullRefresh,
    RefreshPanel,
    RefreshPlaylist,
    RefreshAllPanels,
    RefreshAllPlaylists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub command: WorkerCommandKind,
    #[serde(rename = "panelId", skip_serializing_if = "Option::is_none")]
    pub panel_id: Option<i64>,
    #[serde(rename = "playlistId", skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<i64>,
}

impl WorkerCommand {
    pub fn full_refresh() -> Self {
        Self {
            command: WorkerCommandKind::FullRefresh,
            panel_id: None,
            playlist_id: None,
        }
    }

    pub fn refresh_panel(panel_id: i64) -> Self {
        Self {
            command: WorkerCommandKind::RefreshPanel,
            panel_id: Some(panel_id),
            playlist_id: None,
        }
    }

    pub fn refresh_playlist(playlist_id: i64) -> Self {
        Self {
            command: WorkerCommandKind::RefreshPlaylist,
            panel_id: None,
            playlist_id: Some(playlist_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Ready,
    Status {
        message: String,
    },
    Progress {
        stage: String,
        success: usize,
        total: usize,
        failed: usize,
    },
    Complete {
        summary: RefreshSummary,
        message: String,
    },
    Error {
        error: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd = WorkerCommand::refresh_panel(7);
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"command":"refreshPanel","panelId":7}"#);

        let parsed: WorkerCommand =
            serde_json::from_str(r#"{"command":"fullRefresh"}"#).unwrap();
        assert_eq!(parsed.command, WorkerCommandKind::FullRefresh);
        assert!(parsed.panel_id.is_none());

        let parsed: WorkerCommand =
            serde_json::from_str(r#"{"command":"refreshPlaylist","playlistId":3}"#).unwrap();
        assert_eq!(parsed.command, WorkerCommandKind::RefreshPlaylist);
        assert_eq!(parsed.playlist_id, Some(3));
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_string(&WorkerMessage::Ready).unwrap();
        assert_eq!(json, r#"{"type":"ready"}"#);

        let msg = WorkerMessage::Progress {
            stage: "panels".to_string(),
            success: 2,
            total: 5,
            failed: 1,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"progress""#));
        assert!(json.contains(r#""stage":"panels""#));

        let parsed: WorkerMessage = serde_json::from_str(
            r#"{"type":"complete","summary":{"total":2,"success":2,"failed":0,"skipped":0},"message":"done"}"#,
        )
        .unwrap();
        match parsed {
            WorkerMessage::Complete { summary, .. } => assert_eq!(summary.success, 2),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
