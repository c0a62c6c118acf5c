use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod ipc;

/// The two kinds of upstream source a snapshot can belong to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Panel,
    Playlist,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Panel => "panel",
            SourceKind::Playlist => "playlist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "panel" => Some(SourceKind::Panel),
            "playlist" => Some(SourceKind::Playlist),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A direct reseller backend. Credentials are derived from the stored
/// playback URL or the credentials blob, never entered separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSource {
    pub id: i64,
    pub name: String,
    /// Provider API base URL, paired with credentials parsed from `playback_url`
    pub api_url: Option<String>,
    /// Stored playback (M3U) URL; username/password are extracted from it
    pub playback_url: Option<String>,
    /// JSON credentials blob fallback: `{"username": "...", "password": "..."}`
    pub credentials: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A managed-aggregator record. All playlists share one gateway URL from
/// configuration; each record carries its own guide credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistSource {
    pub id: i64,
    pub name: String,
    pub guide_username: Option<String>,
    pub guide_password: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A normalized category entry. The synthetic `"all"` category carries the
/// source's total stream count and survives entitlement filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub category_id: String,
    pub category_name: String,
    pub channel_count: i64,
}

pub const ALL_CATEGORY_ID: &str = "all";

/// A normalized live stream entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveStream {
    pub stream_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub category_id: String,
    pub epg_channel_id: Option<String>,
    pub is_adult: bool,
}

/// A normalized VOD (movie) entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VodStream {
    pub stream_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub category_id: String,
    pub container_extension: Option<String>,
    pub is_adult: bool,
}

/// A normalized series entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesItem {
    pub series_id: String,
    pub name: String,
    pub cover: Option<String>,
    pub category_id: String,
}

/// A guide channel parsed from an XMLTV document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpgChannel {
    pub id: String,
    pub name: String,
    pub logo: Option<String>,
}

/// A guide program parsed from an XMLTV document.
/// Invariant: `start_ts < stop_ts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpgProgram {
    pub channel_id: String,
    pub start: String,
    pub stop: String,
    pub start_ts: i64,
    pub stop_ts: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
}

/// Parsed EPG payload: channel map, flat program list (document order), and
/// a per-channel index sorted ascending by start timestamp. BTreeMap keeps
/// serialization deterministic so re-parsing the same document round-trips
/// byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EpgData {
    pub channels: BTreeMap<String, EpgChannel>,
    pub programs: Vec<EpgProgram>,
    pub programs_by_channel: BTreeMap<String, Vec<EpgProgram>>,
}

impl EpgData {
    pub fn channel_count(&self) -> i64 {
        self.channels.len() as i64
    }

    pub fn program_count(&self) -> i64 {
        self.programs.len() as i64
    }
}

/// One persisted snapshot row per `(source_kind, source_id)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideSnapshot {
    pub source_kind: SourceKind,
    pub source_id: i64,
    pub categories_json: Option<String>,
    pub channels_json: Option<String>,
    pub category_count: i64,
    pub channel_count: i64,
    pub epg_json: Option<String>,
    pub epg_channel_count: i64,
    pub epg_program_count: i64,
    pub vod_categories_json: Option<String>,
    pub vod_streams_json: Option<String>,
    pub series_categories_json: Option<String>,
    pub series_json: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Result of a connectivity probe. Probe failures are data, not exceptions:
/// they feed a UI/refresh decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

/// Per-source outcome of one refresh pipeline run
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Success(RefreshStats),
    Failed(String),
    /// Credentials could not be derived; the source sat this cycle out
    Skipped(String),
}

#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    pub category_count: usize,
    pub channel_count: usize,
    pub epg_channel_count: usize,
    pub epg_program_count: usize,
    pub vod_count: usize,
    pub series_count: usize,
}

/// Aggregate counts over one refresh cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RefreshSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RefreshSummary {
    pub fn record(&mut self, outcome: &RefreshOutcome) {
        self.total += 1;
        match outcome {
            RefreshOutcome::Success(_) => self.success += 1,
            RefreshOutcome::Failed(_) => self.failed += 1,
            RefreshOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &RefreshSummary) {
        self.total += other.total;
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// A user's service line as recorded by the account CRUD (external to this
/// service). Resolves which source and personal credentials apply to guide
/// requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLine {
    pub user_id: i64,
    pub panel_id: Option<i64>,
    pub panel_username: Option<String>,
    pub panel_password: Option<String>,
    pub playlist_id: Option<i64>,
}

/// Which of the caller's lines a guide request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuideSourceSelector {
    /// The user's playlist line, served through the shared gateway
    Editor,
    /// The user's direct panel line
    Direct,
}

/// A channel entry in a guide response, with a URL personalized to the
/// requesting user's credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideChannel {
    #[serde(flatten)]
    pub stream: LiveStream,
    pub url: String,
}

/// Guide endpoint response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideResponse {
    pub categories: Vec<Category>,
    pub channels: Vec<GuideChannel>,
    pub total_categories: usize,
    pub total_channels: usize,
    pub cache_last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epg: Option<BTreeMap<String, Vec<EpgProgram>>>,
    pub epg_channel_count: usize,
}

/// Typed "not cached yet" reply; never a 5xx, invites an on-demand refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotCachedResponse {
    pub cached: bool,
    pub message: String,
}

impl NotCachedResponse {
    pub fn new() -> Self {
        Self {
            cached: false,
            message: "Guide data is not cached yet; trigger a refresh and retry".to_string(),
        }
    }
}

impl Default for NotCachedResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply to an on-demand refresh trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
    pub summary: RefreshSummary,
}

/// One row of the cache status listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    pub source_kind: SourceKind,
    pub source_id: i64,
    pub category_count: i64,
    pub channel_count: i64,
    pub epg_channel_count: i64,
    pub epg_program_count: i64,
    pub last_updated: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl From<&GuideSnapshot> for SnapshotStatus {
    fn from(s: &GuideSnapshot) -> Self {
        Self {
            source_kind: s.source_kind,
            source_id: s.source_id,
            category_count: s.category_count,
            channel_count: s.channel_count,
            epg_channel_count: s.epg_channel_count,
            epg_program_count: s.epg_program_count,
            last_updated: s.last_updated,
            last_error: s.last_error.clone(),
        }
    }
}
