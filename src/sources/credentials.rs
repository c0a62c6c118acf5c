//! Credential derivation for upstream sources
//!
//! Panel records never store API credentials directly; they are recovered
//! from the stored playback URL (query parameters, then path segments) or
//! from a legacy credentials blob. The parsers are pure and composed with
//! first-success-wins semantics. A panel for which every parser fails is
//! skipped for the refresh cycle rather than treated as failed.

use serde::Deserialize;
use url::Url;

use crate::models::{PanelSource, PlaylistSource};
use crate::utils::normalize_url_scheme;

/// A fully-resolved set of Xtream API credentials for one source
#[derive(Debug, Clone, PartialEq)]
pub struct XtreamCredentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl XtreamCredentials {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Derive API credentials for a panel source.
///
/// Tries, in order: playback-URL query parameters, playback-URL path
/// segments, then the stored credentials blob.
pub fn derive_panel_credentials(panel: &PanelSource) -> Option<XtreamCredentials> {
    from_playback_url_query(panel)
        .or_else(|| from_playback_url_path(panel))
        .or_else(|| from_credentials_blob(panel))
}

/// Resolve credentials for a playlist source against the shared gateway.
/// A playlist missing either guide credential is skipped for the cycle.
pub fn derive_playlist_credentials(
    playlist: &PlaylistSource,
    gateway_url: &str,
) -> Option<XtreamCredentials> {
    let username = playlist.guide_username.as_deref()?.trim();
    let password = playlist.guide_password.as_deref()?.trim();
    if username.is_empty() || password.is_empty() {
        return None;
    }
    Some(XtreamCredentials::new(
        gateway_url.trim_end_matches('/'),
        username,
        password,
    ))
}

/// `http://host/get.php?username=U&password=P` style playback URLs, paired
/// with the separately-stored provider API base URL
fn from_playback_url_query(panel: &PanelSource) -> Option<XtreamCredentials> {
    let api_url = panel.api_url.as_deref()?;
    let playback_url = panel.playback_url.as_deref()?;
    let parsed = Url::parse(&normalize_url_scheme(playback_url)).ok()?;

    let mut username = None;
    let mut password = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "username" => username = Some(value.to_string()),
            "password" => password = Some(value.to_string()),
            _ => {}
        }
    }

    let username = username.filter(|u| !u.is_empty())?;
    let password = password.filter(|p| !p.is_empty())?;
    Some(XtreamCredentials::new(
        api_url.trim_end_matches('/'),
        username,
        password,
    ))
}

/// `http://host/U/P/...` style playback URLs; the API base is the stored
/// provider URL when present, otherwise the playback URL's own origin
fn from_playback_url_path(panel: &PanelSource) -> Option<XtreamCredentials> {
    let playback_url = panel.playback_url.as_deref()?;
    let parsed = Url::parse(&normalize_url_scheme(playback_url)).ok()?;

    let segments: Vec<&str> = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 2 {
        return None;
    }

    // Skip media-class prefixes so stream URLs also resolve
    let (username, password) = match segments[0] {
        "live" | "movie" | "series" => {
            if segments.len() < 3 {
                return None;
            }
            (segments[1], segments[2])
        }
        _ => (segments[0], segments[1]),
    };
    if username.contains('.') || password.contains('.') {
        // Path is a file reference (e.g. /playlist.m3u), not credentials
        return None;
    }

    let base_url = match panel.api_url.as_deref() {
        Some(api_url) => api_url.trim_end_matches('/').to_string(),
        None => origin_of(&parsed)?,
    };

    Some(XtreamCredentials::new(base_url, username, password))
}

#[derive(Deserialize)]
struct CredentialsBlob {
    username: Option<String>,
    password: Option<String>,
    url: Option<String>,
}

/// Legacy JSON blob: `{"username": "...", "password": "...", "url": "..."}`
fn from_credentials_blob(panel: &PanelSource) -> Option<XtreamCredentials> {
    let blob: CredentialsBlob = serde_json::from_str(panel.credentials.as_deref()?).ok()?;
    let username = blob.username.filter(|u| !u.is_empty())?;
    let password = blob.password.filter(|p| !p.is_empty())?;
    let base_url = blob
        .url
        .filter(|u| !u.is_empty())
        .or_else(|| panel.api_url.clone())?;

    Some(XtreamCredentials::new(
        base_url.trim_end_matches('/'),
        username,
        password,
    ))
}

fn origin_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}://{}:{}", url.scheme(), host, port)),
        None => Some(format!("{}://{}", url.scheme(), host)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn panel(
        api_url: Option<&str>,
        playback_url: Option<&str>,
        credentials: Option<&str>,
    ) -> PanelSource {
        PanelSource {
            id: 1,
            name: "test panel".to_string(),
            api_url: api_url.map(String::from),
            playback_url: playback_url.map(String::from),
            credentials: credentials.map(String::from),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_query_parameters_win_first() {
        let p = panel(
            Some("http://api.example.com:8080/"),
            Some("http://m3u.example.com/get.php?username=alice&password=s3cret&type=m3u_plus"),
            Some(r#"{"username":"blob","password":"blob","url":"http://blob.example.com"}"#),
        );
        let creds = derive_panel_credentials(&p).unwrap();
        assert_eq!(creds.base_url, "http://api.example.com:8080");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn test_path_segments_fallback() {
        let p = panel(
            None,
            Some("http://m3u.example.com:2095/alice/s3cret/12345.ts"),
            None,
        );
        let creds = derive_panel_credentials(&p).unwrap();
        assert_eq!(creds.base_url, "http://m3u.example.com:2095");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn test_path_segments_skip_media_class_prefix() {
        let p = panel(
            Some("http://api.example.com"),
            Some("http://cdn.example.com/live/alice/s3cret/99.m3u8"),
            None,
        );
        let creds = derive_panel_credentials(&p).unwrap();
        assert_eq!(creds.base_url, "http://api.example.com");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn test_blob_fallback() {
        let p = panel(
            None,
            None,
            Some(r#"{"username":"bob","password":"hunter2","url":"http://api.example.com/"}"#),
        );
        let creds = derive_panel_credentials(&p).unwrap();
        assert_eq!(creds.base_url, "http://api.example.com");
        assert_eq!(creds.username, "bob");
        assert_eq!(creds.password, "hunter2");
    }

    #[test]
    fn test_no_derivable_credentials() {
        assert!(derive_panel_credentials(&panel(None, None, None)).is_none());
        // Playback URL that is a plain file path carries no credentials
        assert!(derive_panel_credentials(&panel(
            None,
            Some("http://m3u.example.com/playlist.m3u"),
            None
        ))
        .is_none());
        // Blob without a resolvable base URL
        assert!(derive_panel_credentials(&panel(
            None,
            None,
            Some(r#"{"username":"bob","password":"hunter2"}"#)
        ))
        .is_none());
    }

    #[test]
    fn test_playlist_credentials() {
        let playlist = PlaylistSource {
            id: 3,
            name: "aggregated".to_string(),
            guide_username: Some("guide-user".to_string()),
            guide_password: Some("guide-pass".to_string()),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let creds =
            derive_playlist_credentials(&playlist, "http://gateway.example.com/").unwrap();
        assert_eq!(creds.base_url, "http://gateway.example.com");
        assert_eq!(creds.username, "guide-user");

        let mut missing = playlist.clone();
        missing.guide_password = None;
        assert!(derive_playlist_credentials(&missing, "http://gateway.example.com").is_none());
    }
}
