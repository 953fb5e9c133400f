// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local deployment state.
//!
//! The client remembers the last deploy tag it produced in a small JSON file
//! named `.deploy` inside its deploy directory. `start` records its start tag
//! there so `abort` knows what to reset to. A successful sync records the sync
//! tag and ships the file to the deploy target.

use serde::{Deserialize, Serialize};
use std::{
    fs::{create_dir_all, read_to_string, remove_file, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// File name of deployment state.
pub const STATE_FILE: &str = ".deploy";

/// Last deploy tag of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployState {
    pub repo: String,
    pub tag: String,
}

/// Deployment state file on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// Construct new state file inside `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Read recorded state, if any.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Read`] if file exists but cannot be read.
    /// - Return [`StateError::Parse`] if file is not valid state.
    pub fn read(&self) -> Result<Option<DeployState>> {
        let data = match read_to_string(&self.path) {
            Ok(data) => data,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let state = serde_json::from_str(&data).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })?;

        Ok(Some(state))
    }

    /// Record new state, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Serialize`] if state cannot be serialized.
    /// - Return [`StateError::Write`] if file cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn write(&self, state: &DeployState) -> Result<()> {
        let into_error = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            create_dir_all(parent).map_err(into_error)?;
        }

        let data = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
        write(&self.path, data).map_err(into_error)?;
        debug!("recorded {state:?} at {:?}", self.path.display());

        Ok(())
    }

    /// Forget recorded state.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Write`] if file exists but cannot be removed.
    pub fn clear(&self) -> Result<()> {
        match remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Deployment state error types.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read deploy state {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed deploy state {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize deploy state")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write deploy state {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = StateError> = std::result::Result<T, E>;
