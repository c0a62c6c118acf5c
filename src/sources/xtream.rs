//! Xtream-compatible panel API client
//!
//! Stateless read operations against the fixed query-parameter API
//! (`player_api.php?username=&password=&action=...`) and the companion bulk
//! XMLTV endpoint (`xmltv.php`). Action names and the
//! `{base}/{live|movie|series}/{user}/{pass}/{id}.{ext}` stream URL shape are
//! third-party wire formats playback clients depend on and must be
//! reproduced exactly.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::IngestionConfig;
use crate::errors::{AppError, AppResult, SourceError};
use crate::models::{Category, ConnectionTest, LiveStream, SeriesItem, VodStream};
use crate::sources::credentials::XtreamCredentials;
use crate::utils::normalize_url_scheme;

/// Build a live stream playback URL: `{base}/live/{user}/{pass}/{id}.{ext}`
pub fn build_stream_url(
    base: &str,
    username: &str,
    password: &str,
    stream_id: &str,
    extension: &str,
) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}/live/{username}/{password}/{stream_id}.{extension}")
}

/// Build a VOD playback URL: `{base}/movie/{user}/{pass}/{id}.{ext}`
pub fn build_vod_stream_url(
    base: &str,
    username: &str,
    password: &str,
    stream_id: &str,
    extension: &str,
) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}/movie/{username}/{password}/{stream_id}.{extension}")
}

/// Build a series episode playback URL: `{base}/series/{user}/{pass}/{id}.{ext}`
pub fn build_series_stream_url(
    base: &str,
    username: &str,
    password: &str,
    episode_id: &str,
    extension: &str,
) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}/series/{username}/{password}/{episode_id}.{extension}")
}

/// Xtream API client with split timeouts: catalog JSON calls are quick,
/// full XMLTV documents can take minutes on large providers.
#[derive(Clone)]
pub struct XtreamClient {
    catalog_client: Client,
    epg_client: Client,
}

impl XtreamClient {
    pub fn new(config: &IngestionConfig) -> Self {
        Self::with_timeouts(
            Duration::from_secs(config.catalog_timeout_secs),
            Duration::from_secs(config.epg_timeout_secs),
        )
    }

    pub fn with_timeouts(catalog_timeout: Duration, epg_timeout: Duration) -> Self {
        let catalog_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(catalog_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        let epg_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(epg_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            catalog_client,
            epg_client,
        }
    }

    fn player_api_url(
        &self,
        creds: &XtreamCredentials,
        action: Option<&str>,
        extra: &[(&str, &str)],
    ) -> AppResult<reqwest::Url> {
        let base = normalize_url_scheme(creds.base_url.trim_end_matches('/'));
        let mut url = reqwest::Url::parse(&format!("{base}/player_api.php"))
            .map_err(|e| AppError::validation(format!("Invalid Xtream URL '{base}': {e}")))?;

        url.query_pairs_mut()
            .append_pair("username", &creds.username)
            .append_pair("password", &creds.password);
        if let Some(action) = action {
            url.query_pairs_mut().append_pair("action", action);
        }
        for (key, value) in extra {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }

    async fn fetch_action(
        &self,
        creds: &XtreamCredentials,
        action: &str,
        extra: &[(&str, &str)],
    ) -> AppResult<Value> {
        let url = self.player_api_url(creds, Some(action), extra)?;
        debug!("Fetching Xtream action '{}' from {}", action, creds.base_url);

        let response = self.catalog_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Source(SourceError::Http {
                status: response.status().as_u16(),
                message: format!("action {action} rejected"),
            }));
        }
        Ok(response.json().await?)
    }

    /// List live TV categories
    pub async fn get_live_categories(
        &self,
        creds: &XtreamCredentials,
    ) -> AppResult<Vec<Category>> {
        let value = self.fetch_action(creds, "get_live_categories", &[]).await?;
        Ok(parse_categories(value))
    }

    /// List live TV streams
    pub async fn get_live_streams(&self, creds: &XtreamCredentials) -> AppResult<Vec<LiveStream>> {
        let value = self.fetch_action(creds, "get_live_streams", &[]).await?;
        let streams: Vec<LiveStream> = coerce_array(value)
            .iter()
            .filter_map(parse_live_stream)
            .collect();
        info!(
            "Retrieved {} live streams from {}",
            streams.len(),
            creds.base_url
        );
        Ok(streams)
    }

    /// List VOD categories
    pub async fn get_vod_categories(&self, creds: &XtreamCredentials) -> AppResult<Vec<Category>> {
        let value = self.fetch_action(creds, "get_vod_categories", &[]).await?;
        Ok(parse_categories(value))
    }

    /// List VOD (movie) streams
    pub async fn get_vod_streams(&self, creds: &XtreamCredentials) -> AppResult<Vec<VodStream>> {
        let value = self.fetch_action(creds, "get_vod_streams", &[]).await?;
        Ok(coerce_array(value).iter().filter_map(parse_vod_stream).collect())
    }

    /// List series categories
    pub async fn get_series_categories(
        &self,
        creds: &XtreamCredentials,
    ) -> AppResult<Vec<Category>> {
        let value = self
            .fetch_action(creds, "get_series_categories", &[])
            .await?;
        Ok(parse_categories(value))
    }

    /// List series
    pub async fn get_series(&self, creds: &XtreamCredentials) -> AppResult<Vec<SeriesItem>> {
        let value = self.fetch_action(creds, "get_series", &[]).await?;
        Ok(coerce_array(value).iter().filter_map(parse_series_item).collect())
    }

    /// Fetch the short (per-stream) EPG listing, passed through unmodified
    pub async fn get_short_epg(
        &self,
        creds: &XtreamCredentials,
        stream_id: &str,
        limit: u32,
    ) -> AppResult<Value> {
        self.fetch_action(
            creds,
            "get_short_epg",
            &[("stream_id", stream_id), ("limit", &limit.to_string())],
        )
        .await
    }

    /// Download the full XMLTV guide document. Uses the long-timeout client;
    /// provider guides regularly run to tens of MB.
    pub async fn fetch_xmltv(&self, creds: &XtreamCredentials) -> AppResult<String> {
        let base = normalize_url_scheme(creds.base_url.trim_end_matches('/'));
        let mut url = reqwest::Url::parse(&format!("{base}/xmltv.php"))
            .map_err(|e| AppError::validation(format!("Invalid Xtream URL '{base}': {e}")))?;
        url.query_pairs_mut()
            .append_pair("username", &creds.username)
            .append_pair("password", &creds.password);

        info!("Fetching XMLTV guide from {}", creds.base_url);
        let response = self.epg_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Source(SourceError::Http {
                status: response.status().as_u16(),
                message: "xmltv.php rejected".to_string(),
            }));
        }
        let content = response.text().await?;
        info!("Downloaded XMLTV guide ({} bytes)", content.len());
        Ok(content)
    }

    /// Probe connectivity and authentication.
    ///
    /// `user_info.auth == 1` is the sole success signal. Network failures and
    /// malformed responses resolve to `success: false` rather than an error;
    /// this call feeds a refresh/UI decision, not control flow.
    pub async fn test_connection(&self, creds: &XtreamCredentials) -> ConnectionTest {
        let url = match self.player_api_url(creds, None, &[]) {
            Ok(url) => url,
            Err(e) => {
                return ConnectionTest {
                    success: false,
                    message: e.to_string(),
                }
            }
        };

        let response = match self.catalog_client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                return ConnectionTest {
                    success: false,
                    message: format!("Connection failed: {e}"),
                }
            }
        };

        if !response.status().is_success() {
            return ConnectionTest {
                success: false,
                message: format!("HTTP {}", response.status()),
            };
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                return ConnectionTest {
                    success: false,
                    message: format!("Invalid response: {e}"),
                }
            }
        };

        parse_connection_test(&body)
    }
}

/// Interpret an authentication response body per the probe contract
pub fn parse_connection_test(body: &Value) -> ConnectionTest {
    let auth = body
        .get("user_info")
        .and_then(|info| info.get("auth"))
        .map(value_to_bool)
        .unwrap_or(false);

    if auth {
        ConnectionTest {
            success: true,
            message: "Authenticated".to_string(),
        }
    } else {
        let status = body
            .get("user_info")
            .and_then(|info| info.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        ConnectionTest {
            success: false,
            message: format!("Authentication rejected (status: {status})"),
        }
    }
}

/// Coerce an upstream payload to a list. Panels are known to answer with
/// `false`, `{}` or error objects where an empty array is meant.
fn coerce_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Normalize an id-ish field to a string; panels mix numbers and strings
fn value_to_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalize a truthy field; panels emit `1`, `"1"` and `true` interchangeably
fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s == "1",
        _ => false,
    }
}

fn parse_categories(value: Value) -> Vec<Category> {
    coerce_array(value)
        .iter()
        .filter_map(|item| {
            Some(Category {
                category_id: value_to_string(item.get("category_id"))?,
                category_name: value_to_string(item.get("category_name"))
                    .unwrap_or_else(|| "Unnamed".to_string()),
                channel_count: 0,
            })
        })
        .collect()
}

fn parse_live_stream(item: &Value) -> Option<LiveStream> {
    Some(LiveStream {
        stream_id: value_to_string(item.get("stream_id"))?,
        name: value_to_string(item.get("name")).unwrap_or_else(|| "Unnamed".to_string()),
        icon: value_to_string(item.get("stream_icon")),
        category_id: value_to_string(item.get("category_id")).unwrap_or_default(),
        epg_channel_id: value_to_string(item.get("epg_channel_id")),
        is_adult: item.get("is_adult").map(value_to_bool).unwrap_or(false),
    })
}

fn parse_vod_stream(item: &Value) -> Option<VodStream> {
    Some(VodStream {
        stream_id: value_to_string(item.get("stream_id"))?,
        name: value_to_string(item.get("name")).unwrap_or_else(|| "Unnamed".to_string()),
        icon: value_to_string(item.get("stream_icon")),
        category_id: value_to_string(item.get("category_id")).unwrap_or_default(),
        container_extension: value_to_string(item.get("container_extension")),
        is_adult: item.get("is_adult").map(value_to_bool).unwrap_or(false),
    })
}

fn parse_series_item(item: &Value) -> Option<SeriesItem> {
    Some(SeriesItem {
        series_id: value_to_string(item.get("series_id"))?,
        name: value_to_string(item.get("name")).unwrap_or_else(|| "Unnamed".to_string()),
        cover: value_to_string(item.get("cover")),
        category_id: value_to_string(item.get("category_id")).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_url_shape() {
        assert_eq!(
            build_stream_url("http://host:8080", "u", "p", "42", "ts"),
            "http://host:8080/live/u/p/42.ts"
        );
        assert_eq!(
            build_vod_stream_url("http://host:8080/", "u", "p", "42", "mkv"),
            "http://host:8080/movie/u/p/42.mkv"
        );
        assert_eq!(
            build_series_stream_url("http://host:8080//", "u", "p", "7", "mp4"),
            "http://host:8080/series/u/p/7.mp4"
        );
    }

    #[test]
    fn test_stream_url_round_trip() {
        for base in ["http://host:8080", "http://host:8080/"] {
            let url = build_stream_url(base, "alice", "s3cret", "123", "ts");
            let parsed = url::Url::parse(&url).unwrap();
            let segments: Vec<&str> = parsed.path_segments().unwrap().collect();
            assert_eq!(segments, vec!["live", "alice", "s3cret", "123.ts"]);
            let (id, ext) = segments[3].rsplit_once('.').unwrap();
            assert_eq!((id, ext), ("123", "ts"));
        }
    }

    #[test]
    fn test_coerce_non_array_to_empty() {
        assert!(coerce_array(json!(false)).is_empty());
        assert!(coerce_array(json!({"error": "denied"})).is_empty());
        assert!(coerce_array(json!(null)).is_empty());
        assert_eq!(coerce_array(json!([1, 2])).len(), 2);
    }

    #[test]
    fn test_category_normalization() {
        let value = json!([
            {"category_id": 5, "category_name": "News"},
            {"category_id": "12", "category_name": "Sports"},
            {"category_name": "No id, dropped"}
        ]);
        let categories = parse_categories(value);
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category_id, "5");
        assert_eq!(categories[1].category_id, "12");
    }

    #[test]
    fn test_live_stream_normalization() {
        let item = json!({
            "stream_id": 7001,
            "name": "News One HD",
            "stream_icon": "http://logo.example/1.png",
            "category_id": "5",
            "epg_channel_id": "news.one",
            "is_adult": "1"
        });
        let stream = parse_live_stream(&item).unwrap();
        assert_eq!(stream.stream_id, "7001");
        assert_eq!(stream.category_id, "5");
        assert!(stream.is_adult);

        let bare = json!({"stream_id": "8", "name": "Bare", "is_adult": 0});
        let stream = parse_live_stream(&bare).unwrap();
        assert!(!stream.is_adult);
        assert!(stream.epg_channel_id.is_none());
    }

    #[test]
    fn test_connection_test_auth_values() {
        let ok = parse_connection_test(&json!({"user_info": {"auth": 1, "status": "Active"}}));
        assert!(ok.success);

        let ok = parse_connection_test(&json!({"user_info": {"auth": "1"}}));
        assert!(ok.success);

        let rejected =
            parse_connection_test(&json!({"user_info": {"auth": 0, "status": "Expired"}}));
        assert!(!rejected.success);
        assert!(rejected.message.contains("Expired"));

        let missing = parse_connection_test(&json!({"server_info": {}}));
        assert!(!missing.success);
    }
}
