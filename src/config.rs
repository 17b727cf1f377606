// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the configuration file that Dotsmith uses to
//! simplify the process of serialization and deserialization. File I/O is
//! left to the caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Dotsmith configuration layout.
///
/// The configuration file is composed of two basic parts: settings and seed
/// data. The settings section tells Dotsmith where the source tree lives,
/// where rendered content should land, and which GPG recipient encrypted
/// source entries were authored for. The data section is a free-form table
/// whose values become available to template expansion.
///
/// # General Layout
///
/// ```toml
/// [settings]
/// source_dir = "~/.local/share/dotsmith"
/// target_dir = "~"
/// recipient = "3AA5C34371567BD2"
///
/// [data]
/// editor = "nvim"
/// packages = ["git", "tmux"]
/// ```
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Settings for the synchronizer.
    pub settings: Settings,

    /// Seed values merged into the render context.
    #[serde(default)]
    pub data: toml::Table,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on all path fields.
        config.settings.source_dir = TreeRoot::expand(config.settings.source_dir.to_string())?;
        config.settings.target_dir = TreeRoot::expand(config.settings.target_dir.to_string())?;

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Synchronizer configuration settings.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Root of the declarative source-of-truth tree.
    pub source_dir: TreeRoot,

    /// Root of the managed target directory, typically the home directory.
    pub target_dir: TreeRoot,

    /// Fixed GPG recipient key identifier for encrypted source entries.
    pub recipient: Option<String>,
}

/// Path acting as the root of a managed file tree.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct TreeRoot(PathBuf);

impl TreeRoot {
    /// Construct new tree root.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Construct new tree root with shell expansion applied.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if expansion of environment
    ///   variables or tilde prefixes fails.
    pub fn expand(path: impl AsRef<str>) -> Result<Self> {
        Ok(Self(PathBuf::from(
            shellexpand::full(path.as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        )))
    }

    /// Treat tree root as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }
}

impl Display for TreeRoot {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("DOTS", "/home/blah/dotfiles")])]
    fn deserialize_config() -> anyhow::Result<()> {
        let result: Config = r#"
            [settings]
            source_dir = "$DOTS"
            target_dir = "/home/blah"
            recipient = "3AA5C34371567BD2"

            [data]
            editor = "nvim"
            packages = ["git", "tmux"]
        "#
        .parse()?;

        let mut data = toml::Table::new();
        data.insert("editor".into(), toml::Value::String("nvim".into()));
        data.insert(
            "packages".into(),
            toml::Value::Array(vec![
                toml::Value::String("git".into()),
                toml::Value::String("tmux".into()),
            ]),
        );

        let expect = Config {
            settings: Settings {
                source_dir: TreeRoot::new("/home/blah/dotfiles"),
                target_dir: TreeRoot::new("/home/blah"),
                recipient: Some("3AA5C34371567BD2".into()),
            },
            data,
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_config() {
        let result = Config {
            settings: Settings {
                source_dir: TreeRoot::new("/home/blah/dotfiles"),
                target_dir: TreeRoot::new("/home/blah"),
                recipient: None,
            },
            data: toml::Table::new(),
        }
        .to_string();

        let expect = indoc! {r#"
            [settings]
            source_dir = "/home/blah/dotfiles"
            target_dir = "/home/blah"

            [data]
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn deserialize_config_without_data() -> anyhow::Result<()> {
        let result: Config = r#"
            [settings]
            source_dir = "/src"
            target_dir = "/dst"
        "#
        .parse()?;

        assert_eq!(result.settings.recipient, None);
        assert!(result.data.is_empty());

        Ok(())
    }
}
