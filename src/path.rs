// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for the external files that Dotsmith
//! needs to interact with, or manage in some way.

use std::path::PathBuf;

/// Determine absolute path to user's home directory.
///
/// The home directory doubles as the default target tree for synchronization.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the source tree.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/dotsmith` as the default
/// absolute path for the source tree. Does not check if the path returned
/// actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_source_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("dotsmith"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to Dotsmith's configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/dotsmith/config.toml`. Does
/// not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("dotsmith").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the script run-record store.
///
/// Uses XDG Base Directory path `$XDG_STATE_HOME/dotsmith/state.toml`,
/// falling back to the data directory on platforms that lack a state
/// directory. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_state_path() -> Result<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_dir)
        .map(|path| path.join("dotsmith").join("state.toml"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
