//! Error taxonomy. Every variant is fatal at the binary edge.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::WatermarkMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode CSV feed: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to decode JSON feed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("unparseable transaction timestamp {value:?}")]
    Timestamp { value: String },

    #[error("unparseable transaction amount {value:?}")]
    Amount { value: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read state file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write state file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("state file {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode watermark: {0}")]
    Encode(serde_json::Error),

    #[error("state file holds a {found} watermark but {expected} is configured")]
    ModeMismatch {
        expected: WatermarkMode,
        found: WatermarkMode,
    },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned HTTP {status}")]
    Status { status: u16 },

    #[error("invalid webhook URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Any failure that aborts a poll cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}
