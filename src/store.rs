use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::types::{Watermark, WatermarkMode};

/// Default state file path, relative to the working directory.
pub const DEFAULT_STATE_PATH: &str = ".opencollective-state.json";

/// On-disk envelope around the watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub saved_at: DateTime<Utc>,
    pub watermark: Watermark,
}

/// Single-file watermark storage. A missing file means "never saved".
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted watermark, `Ok(None)` if nothing was ever saved.
    ///
    /// A file that exists but cannot be decoded is an error; it is never
    /// treated as a first run.
    pub fn load(&self) -> Result<Option<Watermark>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let state: StateFile =
            serde_json::from_str(&contents).map_err(|source| StoreError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(state.watermark))
    }

    /// Like [`load`](Self::load), but rejects a watermark of another mode.
    pub fn load_for(&self, mode: WatermarkMode) -> Result<Option<Watermark>, StoreError> {
        match self.load()? {
            Some(wm) if wm.mode() != mode => Err(StoreError::ModeMismatch {
                expected: mode,
                found: wm.mode(),
            }),
            other => Ok(other),
        }
    }

    /// Persist `watermark` by writing a sibling temp file and renaming it over
    /// the target, so a crash never leaves a half-written state file.
    pub fn save(&self, watermark: &Watermark) -> Result<(), StoreError> {
        let state = StateFile {
            saved_at: Utc::now(),
            watermark: watermark.clone(),
        };
        let json = serde_json::to_string_pretty(&state).map_err(StoreError::Encode)?;

        let tmp = self.tmp_path();
        let write_err = |source| StoreError::Write {
            path: tmp.clone(),
            source,
        };
        let mut file = fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.write_all(b"\n").map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!("Saved {} watermark to {}", watermark.mode(), self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
