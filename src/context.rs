// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Render context construction.
//!
//! The __render context__ is the set of variable bindings made available to
//! template expansion. It is built exactly once per invocation from two
//! sources: environment probes (hostname, operating system identifier,
//! architecture, username, home directory, OS-release metadata), and the
//! free-form `[data]` table of the configuration file. Once built, the
//! context stays immutable for the rest of the run so that rendering the
//! same template always yields the same output within one invocation.
//!
//! # Collision Policy
//!
//! User supplied `[data]` values override probed builtins on key collision.
//! The builtins sit at the top level (`.hostname`, `.os`, `.arch`,
//! `.username`, `.home`, `.os_release`) because that is how source entries
//! reference them.

use std::{collections::BTreeMap, env, fs, path::Path};

/// A single value bound in the render context.
///
/// Mirrors the value set of the configuration's `[data]` table, so anything
/// the user can write in TOML can flow into template expansion.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Human-readable name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Render value as text for interpolation.
    ///
    /// Lists and maps have no scalar text form, so they yield [`None`] and
    /// the renderer reports a typed error instead of guessing.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::String(value) => Some(value.clone()),
            Self::Bool(value) => Some(value.to_string()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Float(value) => Some(value.to_string()),
            Self::List(_) | Self::Map(_) => None,
        }
    }

    /// Traverse nested maps along `path`.
    pub fn lookup(&self, path: &[String]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            match current {
                Self::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }

        Some(current)
    }
}

impl From<toml::Value> for Value {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(value) => Self::String(value),
            toml::Value::Integer(value) => Self::Integer(value),
            toml::Value::Float(value) => Self::Float(value),
            toml::Value::Boolean(value) => Self::Bool(value),
            toml::Value::Datetime(value) => Self::String(value.to_string()),
            toml::Value::Array(values) => Self::List(values.into_iter().map(Into::into).collect()),
            toml::Value::Table(table) => Self::Map(
                table
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        }
    }
}

/// Immutable variable bindings for template expansion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderContext {
    root: BTreeMap<String, Value>,
}

impl RenderContext {
    /// Build context from environment probes and configuration seed data.
    ///
    /// Probes never fail: a hostname that cannot be determined falls back to
    /// `"unknown"`, and OS-release metadata is simply empty on platforms
    /// without `/etc/os-release`. A missing binding only matters once a
    /// template actually references it.
    pub fn from_probes(data: &toml::Table) -> Self {
        let mut root = BTreeMap::new();
        root.insert("hostname".into(), Value::String(probe_hostname()));
        root.insert("os".into(), Value::String(env::consts::OS.into()));
        root.insert("arch".into(), Value::String(env::consts::ARCH.into()));
        root.insert("username".into(), Value::String(probe_username()));
        if let Some(home) = dirs::home_dir() {
            root.insert(
                "home".into(),
                Value::String(home.to_string_lossy().into_owned()),
            );
        }
        root.insert("os_release".into(), Value::Map(probe_os_release()));

        // INVARIANT: User data wins on key collision with probed builtins.
        for (key, value) in data {
            root.insert(key.clone(), value.clone().into());
        }

        Self { root }
    }

    /// Build context directly from bindings, bypassing probes.
    pub fn from_values(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            root: values.into_iter().collect(),
        }
    }

    /// Resolve a dotted variable path against the context root.
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        self.root.get(first)?.lookup(rest)
    }
}

fn probe_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    for candidate in ["/proc/sys/kernel/hostname", "/etc/hostname"] {
        if let Ok(contents) = fs::read_to_string(candidate) {
            let hostname = contents.trim();
            if !hostname.is_empty() {
                return hostname.to_string();
            }
        }
    }

    "unknown".to_string()
}

fn probe_username() -> String {
    env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn probe_os_release() -> BTreeMap<String, Value> {
    fs::read_to_string(Path::new("/etc/os-release"))
        .map(|contents| parse_os_release(&contents))
        .unwrap_or_default()
}

/// Parse `os-release(5)` key-value pairs into context bindings.
///
/// Keys are lowercased, surrounding quotes are stripped from values, and
/// malformed lines are skipped rather than rejected.
fn parse_os_release(contents: &str) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let value = value
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        map.insert(key.trim().to_lowercase(), Value::String(value));
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn parse_os_release_strips_quotes_and_lowercases() {
        let contents = indoc! {r#"
            NAME="Arch Linux"
            ID=arch

            # comment
            BUILD_ID='rolling'
            garbage line
        "#};

        let result = parse_os_release(contents);

        let mut expect = BTreeMap::new();
        expect.insert("name".to_string(), Value::String("Arch Linux".into()));
        expect.insert("id".to_string(), Value::String("arch".into()));
        expect.insert("build_id".to_string(), Value::String("rolling".into()));

        assert_eq!(result, expect);
    }

    #[sealed_test(env = [("HOSTNAME", "laptop1"), ("USER", "blah")])]
    fn probes_prefer_environment() {
        let context = RenderContext::from_probes(&toml::Table::new());

        assert_eq!(
            context.get_path(&["hostname".into()]),
            Some(&Value::String("laptop1".into()))
        );
        assert_eq!(
            context.get_path(&["username".into()]),
            Some(&Value::String("blah".into()))
        );
    }

    #[sealed_test(env = [("HOSTNAME", "laptop1")])]
    fn user_data_overrides_builtins() {
        let mut data = toml::Table::new();
        data.insert("hostname".into(), toml::Value::String("desktop2".into()));

        let context = RenderContext::from_probes(&data);

        assert_eq!(
            context.get_path(&["hostname".into()]),
            Some(&Value::String("desktop2".into()))
        );
    }

    #[test]
    fn nested_lookup_traverses_maps() {
        let mut inner = BTreeMap::new();
        inner.insert("id".to_string(), Value::String("arch".into()));
        let context = RenderContext::from_values([(
            "os_release".to_string(),
            Value::Map(inner),
        )]);

        assert_eq!(
            context.get_path(&["os_release".into(), "id".into()]),
            Some(&Value::String("arch".into()))
        );
        assert_eq!(context.get_path(&["os_release".into(), "nope".into()]), None);
    }

    #[test]
    fn list_has_no_text_form() {
        assert_eq!(Value::List(vec![]).as_text(), None);
        assert_eq!(Value::Integer(42).as_text(), Some("42".to_string()));
    }
}
