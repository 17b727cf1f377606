// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Script run-record persistence.
//!
//! Dotsmith remembers which setup scripts already ran on this machine so
//! the run gates in [`crate::script`] can make their execute-or-skip
//! decision. Records live in a small TOML file under the XDG state
//! directory, one table per script:
//!
//! ```toml
//! [script."setup.sh"]
//! hash = "sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae"
//! last_run = "2025-11-02T09:41:00Z"
//! ```
//!
//! A record is only ever written after its script exits successfully, and
//! the whole file is rewritten atomically, so a crash between script runs
//! never corrupts the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    str::FromStr,
};

use crate::fsutil;

/// Proof that a script ran successfully at some point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ScriptRunRecord {
    /// Canonical `sha256:<hex>` hash of the rendered content that ran.
    pub hash: String,

    /// When the successful run finished.
    pub last_run: DateTime<Utc>,
}

/// Persisted collection of script run records.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StateStore {
    /// Records keyed by script name.
    #[serde(default, rename = "script")]
    scripts: BTreeMap<String, ScriptRunRecord>,
}

impl StateStore {
    /// Load the store from disk.
    ///
    /// A missing file is an empty store: the first run of a fresh machine
    /// has no history yet.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Read`] if the file exists but cannot be read.
    /// - Return [`StateError::Config`] if the file cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(StateError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        contents.parse()
    }

    /// Persist the store to disk atomically.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Config`] if serialization fails.
    /// - Return [`StateError::Write`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::write_atomic(path, self.to_string().as_bytes(), 0o600).map_err(|err| {
            StateError::Write {
                path: path.to_path_buf(),
                source: err,
            }
        })
    }

    /// Look up the record for a script name.
    pub fn record(&self, name: &str) -> Option<&ScriptRunRecord> {
        self.scripts.get(name)
    }

    /// Record a successful run, replacing any prior record.
    pub fn upsert(&mut self, name: impl Into<String>, hash: impl Into<String>) {
        self.scripts.insert(
            name.into(),
            ScriptRunRecord {
                hash: hash.into(),
                last_run: Utc::now(),
            },
        );
    }
}

impl FromStr for StateStore {
    type Err = StateError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(|err| StateError::Config(err.into()))
    }
}

impl Display for StateStore {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(|_| std::fmt::Error)?
                .as_str(),
        )
    }
}

/// State persistence error types.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// State file exists but cannot be read.
    #[error("cannot read state file {path:?}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// State file cannot be written.
    #[error("cannot write state file {path:?}")]
    Write {
        path: std::path::PathBuf,
        source: crate::fsutil::FsError,
    },

    /// State file cannot be parsed or serialized.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Friendly result alias :3
type Result<T, E = StateError> = std::result::Result<T, E>;
