use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to read state from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write state to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse state from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to create state directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
}

/// Values the daemon remembers across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    /// Owner of the media session that was most recently playing.
    #[serde(default)]
    pub last_playback_owner: Option<String>,
}

impl DaemonState {
    /// Load state from a JSON file. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StateError::Parse {
                path: path.to_owned(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DaemonState::default()),
            Err(source) => Err(StateError::Read {
                path: path.to_owned(),
                source,
            }),
        }
    }

    /// Save state atomically: write `path.tmp`, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StateError::CreateDir {
                path: parent.to_owned(),
                source,
            })?;
        }

        let mut contents = serde_json::to_vec_pretty(self)?;
        contents.push(b'\n');

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &contents).map_err(|source| StateError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| StateError::Write {
            path: path.to_owned(),
            source,
        })
    }

    /// `$XDG_STATE_HOME/shuttled/state.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::state_dir()?.join("shuttled").join("state.json"))
    }
}
