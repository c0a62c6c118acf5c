use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub ingestion: IngestionConfig,
    pub cache: CacheConfig,
    pub guide: GuideConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub base_url: String,
}

/// Settings governing scheduled and on-demand catalog/EPG refreshes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Cron expression for the full-catalog refresh cycle
    #[serde(default = "default_refresh_cron")]
    pub refresh_cron: String,
    /// Delay before a playlist-triggered refresh runs; re-triggering restarts it
    #[serde(default = "default_playlist_refresh_delay_secs")]
    pub playlist_refresh_delay_secs: u64,
    /// Timeout for catalog JSON API calls
    #[serde(default = "default_catalog_timeout_secs")]
    pub catalog_timeout_secs: u64,
    /// Timeout for bulk XMLTV guide downloads, which can run to tens of MB
    #[serde(default = "default_epg_timeout_secs")]
    pub epg_timeout_secs: u64,
    /// Programs further than this many days in the future are dropped at parse time
    #[serde(default = "default_epg_retention_days")]
    pub epg_retention_days: i64,
}

/// Settings for the short-lived in-process guide cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Pause between per-source cache reloads after a refresh cycle
    #[serde(default = "default_reload_delay_ms")]
    pub reload_delay_ms: u64,
}

/// Settings for the user-facing guide endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideConfig {
    /// Shared gateway base URL that playlist guide credentials authenticate against
    pub playlist_gateway_url: Option<String>,
    /// When the live entitlement call fails, show all cached categories
    /// instead of denying the request
    #[serde(default = "default_entitlement_fail_open")]
    pub entitlement_fail_open: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_refresh_cron() -> String {
    // sec min hour day month weekday
    "0 0 */2 * * *".to_string()
}

fn default_playlist_refresh_delay_secs() -> u64 {
    300
}

fn default_catalog_timeout_secs() -> u64 {
    30
}

fn default_epg_timeout_secs() -> u64 {
    300
}

fn default_epg_retention_days() -> i64 {
    7
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_reload_delay_ms() -> u64 {
    250
}

fn default_entitlement_fail_open() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./guide-cache.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: default_host(),
                port: default_port(),
                base_url: "http://localhost:8080".to_string(),
            },
            ingestion: IngestionConfig::default(),
            cache: CacheConfig::default(),
            guide: GuideConfig {
                playlist_gateway_url: None,
                entitlement_fail_open: default_entitlement_fail_open(),
            },
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            refresh_cron: default_refresh_cron(),
            playlist_refresh_delay_secs: default_playlist_refresh_delay_secs(),
            catalog_timeout_secs: default_catalog_timeout_secs(),
            epg_timeout_secs: default_epg_timeout_secs(),
            epg_retention_days: default_epg_retention_days(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            reload_delay_ms: default_reload_delay_ms(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, contents)?;
            Ok(default_config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_optional_sections() {
        let toml = r#"
            [database]
            url = "sqlite://./test.db"

            [web]
            base_url = "http://localhost:8080"

            [ingestion]

            [cache]

            [guide]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ingestion.refresh_cron, "0 0 */2 * * *");
        assert_eq!(config.ingestion.epg_retention_days, 7);
        assert_eq!(config.cache.ttl_secs, 300);
        assert!(config.guide.entitlement_fail_open);
        assert!(config.guide.playlist_gateway_url.is_none());
    }
}
