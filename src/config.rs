use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::feed::{DEFAULT_COLLECTIVE_ID, DEFAULT_CSV_URL, DEFAULT_GRAPHQL_URL};
use crate::notifier::DEFAULT_WEBHOOK_BASE;
use crate::store::DEFAULT_STATE_PATH;
use crate::types::{WatermarkMode, parse_timestamp};

/// Default config file path.
pub const CONFIG_PATH: &str = "notifier.toml";

/// Which upstream feed to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FeedKind {
    /// REST CSV export (no ids, timestamp watermark).
    RestCsv,
    /// GraphQL `allTransactions` (stable ids, id watermark).
    #[value(name = "graphql")]
    #[serde(rename = "graphql")]
    GraphQl,
}

impl FeedKind {
    pub fn default_watermark(self) -> WatermarkMode {
        match self {
            FeedKind::RestCsv => WatermarkMode::ByTimestamp,
            FeedKind::GraphQl => WatermarkMode::ById,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "notifier",
    about = "Announce new Open Collective transactions to a CodeX Bot webhook"
)]
pub struct Args {
    /// Only transactions after this time are ever announced (YYYY-MM-DDTHH:MM:SS)
    #[arg(long, env = "START_DATE")]
    pub start_date: Option<String>,

    /// CodeX Bot webhook token
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Minutes between poll cycles
    #[arg(long, env = "PERIODICITY")]
    pub periodicity: Option<u64>,

    /// Feed to poll (overrides the config file)
    #[arg(long, env = "FEED", value_enum)]
    pub feed: Option<FeedKind>,

    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    pub config: PathBuf,

    /// Path to the watermark state file (overrides the config file)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}

/// Optional settings deserialized from `notifier.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_kind")]
    pub kind: FeedKind,
    #[serde(default = "default_csv_url")]
    pub csv_url: String,
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    #[serde(default = "default_collective_id")]
    pub collective_id: u64,
    /// Overrides the feed's default watermark mode.
    #[serde(default)]
    pub watermark: Option<WatermarkMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_webhook_base")]
    pub webhook_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Timeout for every HTTP request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_feed_kind() -> FeedKind {
    FeedKind::RestCsv
}

fn default_csv_url() -> String {
    DEFAULT_CSV_URL.to_string()
}

fn default_graphql_url() -> String {
    DEFAULT_GRAPHQL_URL.to_string()
}

fn default_collective_id() -> u64 {
    DEFAULT_COLLECTIVE_ID
}

fn default_webhook_base() -> String {
    DEFAULT_WEBHOOK_BASE.to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: default_feed_kind(),
            csv_url: default_csv_url(),
            graphql_url: default_graphql_url(),
            collective_id: default_collective_id(),
            watermark: None,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_base: default_webhook_base(),
        }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_toml(&contents, path)
    }

    fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub feed: FeedKind,
    pub csv_url: Url,
    pub graphql_url: Url,
    pub collective_id: u64,
    pub watermark_mode: WatermarkMode,
    pub start_date: DateTime<Utc>,
    pub token: String,
    pub webhook_base: Url,
    /// `None` only when running a single cycle.
    pub periodicity: Option<Duration>,
    pub state_path: PathBuf,
    pub request_timeout: Duration,
    pub once: bool,
}

impl Config {
    /// Merge CLI/env settings over the config file and validate the result.
    pub fn resolve(args: Args, file: AppConfig) -> Result<Self, ConfigError> {
        let start_raw = non_empty(args.start_date).ok_or(ConfigError::Missing("START_DATE"))?;
        let start_date = parse_timestamp(&start_raw).ok_or_else(|| ConfigError::Invalid {
            field: "START_DATE",
            reason: format!("{start_raw:?} is not YYYY-MM-DDTHH:MM:SS"),
        })?;

        let token = non_empty(args.token).ok_or(ConfigError::Missing("TOKEN"))?;

        let periodicity = match (args.periodicity, args.once) {
            (Some(0), _) => {
                return Err(ConfigError::Invalid {
                    field: "PERIODICITY",
                    reason: "must be at least 1 minute".to_string(),
                });
            }
            (Some(minutes), _) => Some(Duration::from_secs(minutes.saturating_mul(60))),
            (None, true) => None,
            (None, false) => return Err(ConfigError::Missing("PERIODICITY")),
        };

        let feed = args.feed.unwrap_or(file.feed.kind);
        let watermark_mode = file
            .feed
            .watermark
            .unwrap_or_else(|| feed.default_watermark());
        if feed == FeedKind::RestCsv && watermark_mode == WatermarkMode::ById {
            return Err(ConfigError::Invalid {
                field: "feed.watermark",
                reason: "the rest-csv feed has no ids; use by-timestamp".to_string(),
            });
        }

        if file.settings.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "settings.request_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            feed,
            csv_url: parse_url("feed.csv_url", &file.feed.csv_url)?,
            graphql_url: parse_url("feed.graphql_url", &file.feed.graphql_url)?,
            collective_id: file.feed.collective_id,
            watermark_mode,
            start_date,
            token,
            webhook_base: parse_base_url("notifier.webhook_base", &file.notifier.webhook_base)?,
            periodicity,
            state_path: args.state_file.unwrap_or(file.settings.state_path),
            request_timeout: Duration::from_secs(file.settings.request_timeout_secs),
            once: args.once,
        })
    }
}

impl Config {
    /// Shared HTTP client for the feed and the webhook.
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("{raw:?}: {e}"),
    })
}

/// Parse a base URL that a path segment gets joined onto.
fn parse_base_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    if raw.ends_with('/') {
        parse_url(field, raw)
    } else {
        parse_url(field, &format!("{raw}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "notifier",
            "--start-date",
            "2024-01-01T00:00:00",
            "--token",
            "secret",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn resolves_defaults() {
        let cfg = Config::resolve(args(&["--periodicity", "5"]), AppConfig::default()).unwrap();
        assert_eq!(cfg.feed, FeedKind::RestCsv);
        assert_eq!(cfg.watermark_mode, WatermarkMode::ByTimestamp);
        assert_eq!(cfg.periodicity, Some(Duration::from_secs(300)));
        assert_eq!(cfg.state_path, PathBuf::from(DEFAULT_STATE_PATH));
        assert_eq!(cfg.token, "secret");
        assert_eq!(cfg.webhook_base.as_str(), DEFAULT_WEBHOOK_BASE);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn graphql_defaults_to_id_watermark() {
        let cfg = Config::resolve(
            args(&["--periodicity", "1", "--feed", "graphql"]),
            AppConfig::default(),
        )
        .unwrap();
        assert_eq!(cfg.feed, FeedKind::GraphQl);
        assert_eq!(cfg.watermark_mode, WatermarkMode::ById);
    }

    #[test]
    fn missing_periodicity_is_fatal_unless_once() {
        let err = Config::resolve(args(&[]), AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PERIODICITY")));

        let cfg = Config::resolve(args(&["--once"]), AppConfig::default()).unwrap();
        assert!(cfg.once);
        assert_eq!(cfg.periodicity, None);
    }

    #[test]
    fn zero_periodicity_is_invalid() {
        let err = Config::resolve(args(&["--periodicity", "0"]), AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "PERIODICITY", .. }));
    }

    #[test]
    fn bad_start_date_is_invalid() {
        let mut a = args(&["--once"]);
        a.start_date = Some("yesterday".to_string());
        let err = Config::resolve(a, AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "START_DATE", .. }));
    }

    #[test]
    fn blank_token_is_missing() {
        let mut a = args(&["--once"]);
        a.token = Some("   ".to_string());
        let err = Config::resolve(a, AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TOKEN")));
    }

    #[test]
    fn csv_feed_rejects_id_watermark() {
        let file: AppConfig = toml::from_str(
            r#"
            [feed]
            kind = "rest-csv"
            watermark = "by-id"
            "#,
        )
        .unwrap();
        let err = Config::resolve(args(&["--once"]), file).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "feed.watermark", .. }));
    }

    #[test]
    fn file_settings_apply_and_cli_overrides() {
        let file: AppConfig = toml::from_str(
            r#"
            [feed]
            kind = "graphql"
            collective_id = 1234
            watermark = "by-timestamp"

            [notifier]
            webhook_base = "https://hooks.example.com/u"

            [settings]
            state_path = "/var/lib/notifier/state.json"
            request_timeout_secs = 10
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(args(&["--once", "--state-file", "local.json"]), file).unwrap();
        assert_eq!(cfg.feed, FeedKind::GraphQl);
        assert_eq!(cfg.collective_id, 1234);
        assert_eq!(cfg.watermark_mode, WatermarkMode::ByTimestamp);
        assert_eq!(cfg.webhook_base.as_str(), "https://hooks.example.com/u/");
        assert_eq!(cfg.state_path, PathBuf::from("local.json"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let mut file = AppConfig::default();
        file.feed.csv_url = "not a url".to_string();
        let err = Config::resolve(args(&["--once"]), file).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "feed.csv_url", .. }));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.feed.kind, FeedKind::RestCsv);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifier.toml");
        std::fs::write(&path, "[feed\nkind = ").unwrap();
        assert!(matches!(
            AppConfig::load(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
