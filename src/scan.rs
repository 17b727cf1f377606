// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Source tree scanning.
//!
//! The source tree is the declarative source of truth for the target
//! directory. Instead of carrying a manifest, it encodes target metadata
//! directly into filenames through a fixed prefix/suffix vocabulary. The
//! scanner walks the source root and decodes every path into a
//! [`SourceEntry`] describing what should exist at the target.
//!
//! # Filename Vocabulary
//!
//! This vocabulary is a wire format: existing dotfile repositories depend on
//! it, so the decode table must be reproduced exactly.
//!
//! | Token            | Applies to | Meaning                                   |
//! |------------------|------------|-------------------------------------------|
//! | `dot_`           | both       | target name begins with `.`               |
//! | `private_`       | both       | strip group/other permission bits         |
//! | `exact_`         | dirs       | delete target files not present in source |
//! | `encrypted_`     | files      | content is a GPG blob, decrypt at plan    |
//! | `executable_`    | files      | set the executable bits                   |
//! | `symlink_`       | files      | content is a symlink destination          |
//! | `run_once_`      | files      | script, gated by name                     |
//! | `run_onchange_`  | files      | script, gated by rendered-content hash    |
//! | `.tmpl` (suffix) | files      | content passes through the renderer       |
//!
//! Tokens compose left to right in the order of the table, e.g.
//! `private_dot_ssh/encrypted_private_id_rsa.tmpl` or
//! `run_onchange_install.sh.tmpl`. `private_` on a directory cascades to
//! everything beneath it. A token out of order is not an error;
//! the remainder is simply treated as a literal filename. Content
//! processing order downstream is fixed: decrypt, render, hash, then the
//! decoded name determines target path and permissions.
//!
//! # Ignore Rules
//!
//! A `.dotsmithignore` file at the source root holds gitignore-syntax
//! patterns of source-relative paths to skip. The ignore file itself and
//! any `.git` directory at the root are never source entries.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use ignore::WalkBuilder;
use tracing::{debug, instrument, trace};

/// Name of the ignore file honored at the source root.
pub const IGNORE_FILE: &str = ".dotsmithignore";

/// One decoded file, directory, symlink, or script from the source tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceEntry {
    /// Absolute path of the entry inside the source tree.
    pub source_path: PathBuf,

    /// Decoded path relative to the target root.
    pub target_path: PathBuf,

    /// What kind of target object this entry produces.
    pub kind: EntryKind,

    /// Decoded attribute flags.
    pub attributes: Attributes,

    /// Script execution gate, [`RunPolicy::None`] for non-scripts.
    pub run_policy: RunPolicy,
}

impl SourceEntry {
    /// Permission bits the decoded attributes call for.
    pub fn mode(&self) -> u32 {
        match self.kind {
            EntryKind::Dir => {
                if self.attributes.private {
                    0o700
                } else {
                    0o755
                }
            }
            _ => match (self.attributes.private, self.attributes.executable) {
                (true, true) => 0o700,
                (true, false) => 0o600,
                (false, true) => 0o755,
                (false, false) => 0o644,
            },
        }
    }

    /// Script gate key: the decoded name with run prefixes stripped.
    ///
    /// Keyed by name rather than content on purpose; see [`RunPolicy`].
    pub fn script_name(&self) -> String {
        self.target_path.to_string_lossy().into_owned()
    }
}

/// Kind of target object a source entry produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file written to the target tree.
    File,

    /// Directory created in the target tree.
    Dir,

    /// Symbolic link whose destination is the entry's content.
    Symlink,

    /// Script executed after file synchronization, never written to the
    /// target tree.
    Script,
}

/// Decoded attribute flags of a source entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attributes {
    /// Content passes through the template renderer.
    pub template: bool,

    /// Content is a GPG blob that must be decrypted before use.
    pub encrypted: bool,

    /// Permissions exclude group/other access.
    pub private: bool,

    /// Executable bits are set.
    pub executable: bool,

    /// Directory contents must exactly match the source.
    pub exact: bool,
}

/// Script execution gate.
///
/// `Once` scripts are keyed by script *name*: once a success record exists
/// the script never runs again, even if its content changes later. That is
/// an explicit contract of the filename vocabulary, not an oversight.
/// `OnChange` scripts are keyed by the hash of their rendered content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunPolicy {
    #[default]
    None,
    Once,
    OnChange,
}

/// Decode one file name into its target name, attributes, and kind.
///
/// Pure function: the same input always produces the same decoding, which
/// is what makes scanning deterministic.
pub fn decode_file_name(name: &str) -> (String, Attributes, RunPolicy, EntryKind) {
    let mut attributes = Attributes::default();
    let mut rest = name;

    let (run_policy, mut kind) = if let Some(stripped) = rest.strip_prefix("run_once_") {
        rest = stripped;
        (RunPolicy::Once, EntryKind::Script)
    } else if let Some(stripped) = rest.strip_prefix("run_onchange_") {
        rest = stripped;
        (RunPolicy::OnChange, EntryKind::Script)
    } else {
        (RunPolicy::None, EntryKind::File)
    };

    if let Some(stripped) = rest.strip_prefix("encrypted_") {
        rest = stripped;
        attributes.encrypted = true;
    }

    if let Some(stripped) = rest.strip_prefix("private_") {
        rest = stripped;
        attributes.private = true;
    }

    if let Some(stripped) = rest.strip_prefix("executable_") {
        rest = stripped;
        attributes.executable = true;
    }

    if kind == EntryKind::File {
        if let Some(stripped) = rest.strip_prefix("symlink_") {
            rest = stripped;
            kind = EntryKind::Symlink;
        }
    }

    let mut target = if let Some(stripped) = rest.strip_prefix("dot_") {
        format!(".{stripped}")
    } else {
        rest.to_string()
    };

    if let Some(stripped) = target.strip_suffix(".tmpl") {
        target = stripped.to_string();
        attributes.template = true;
    }

    (target, attributes, run_policy, kind)
}

/// Decode one directory name into its target name and attributes.
pub fn decode_dir_name(name: &str) -> (String, Attributes) {
    let mut attributes = Attributes::default();
    let mut rest = name;

    if let Some(stripped) = rest.strip_prefix("exact_") {
        rest = stripped;
        attributes.exact = true;
    }

    if let Some(stripped) = rest.strip_prefix("private_") {
        rest = stripped;
        attributes.private = true;
    }

    let target = if let Some(stripped) = rest.strip_prefix("dot_") {
        format!(".{stripped}")
    } else {
        rest.to_string()
    };

    (target, attributes)
}

/// Encode a target file name back into source vocabulary.
///
/// Inverse of [`decode_file_name`] for the attribute set the `add` command
/// can express. Token order matches the decode table, so round trips are
/// exact.
pub fn encode_file_name(name: &str, attributes: Attributes) -> String {
    let mut encoded = String::new();

    if attributes.encrypted {
        encoded.push_str("encrypted_");
    }
    if attributes.private {
        encoded.push_str("private_");
    }
    if attributes.executable {
        encoded.push_str("executable_");
    }

    match name.strip_prefix('.') {
        Some(stripped) => {
            encoded.push_str("dot_");
            encoded.push_str(stripped);
        }
        None => encoded.push_str(name),
    }

    if attributes.template {
        encoded.push_str(".tmpl");
    }

    encoded
}

/// Encode a target directory name back into source vocabulary.
pub fn encode_dir_name(name: &str) -> String {
    match name.strip_prefix('.') {
        Some(stripped) => format!("dot_{stripped}"),
        None => name.to_string(),
    }
}

/// Source tree scanner.
///
/// Walks the source root in deterministic lexical order and decodes every
/// path into a [`SourceEntry`].
#[derive(Clone, Debug)]
pub struct Scanner {
    source_root: PathBuf,
}

impl Scanner {
    /// Construct new scanner over a source root.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }

    /// Produce the ordered entry list for the source tree.
    ///
    /// # Errors
    ///
    /// - Return [`ScanError::SourceRootUnreadable`] if the source root is
    ///   missing or cannot be read.
    /// - Return [`ScanError::Walk`] if any entry under the root cannot be
    ///   read; a partial scan is never returned.
    /// - Return [`ScanError::NonUtf8FileName`] for names the decode table
    ///   cannot interpret.
    /// - Return [`ScanError::DuplicateTarget`] if two source entries decode
    ///   to the same target path.
    #[instrument(skip(self), level = "debug")]
    pub fn scan(&self) -> Result<Vec<SourceEntry>> {
        std::fs::read_dir(&self.source_root).map_err(|err| ScanError::SourceRootUnreadable {
            path: self.source_root.clone(),
            source: err,
        })?;

        let mut walker = WalkBuilder::new(&self.source_root);
        walker
            .standard_filters(false)
            .hidden(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .sort_by_file_name(|a, b| a.cmp(b));

        // Maps source-relative directory paths to their decoded target
        // paths and privacy, so children resolve against already-decoded
        // parents and inherit restricted permissions.
        let mut dir_targets: HashMap<PathBuf, (PathBuf, bool)> = HashMap::new();
        dir_targets.insert(PathBuf::new(), (PathBuf::new(), false));

        let mut entries = Vec::new();
        let mut seen: HashMap<PathBuf, PathBuf> = HashMap::new();

        for result in walker.build() {
            let dir_entry = result?;
            if dir_entry.depth() == 0 {
                continue;
            }

            let source_path = dir_entry.path().to_path_buf();
            let relative = source_path
                .strip_prefix(&self.source_root)
                .expect("walker yields paths under its root")
                .to_path_buf();

            if self.is_internal(&relative) {
                trace!("skip internal entry {:?}", relative);
                continue;
            }

            let name = dir_entry
                .file_name()
                .to_str()
                .ok_or_else(|| ScanError::NonUtf8FileName {
                    path: source_path.clone(),
                })?;

            let parent_relative = relative.parent().unwrap_or(Path::new("")).to_path_buf();
            let (parent_target, parent_private) = dir_targets
                .get(&parent_relative)
                .cloned()
                .unwrap_or((parent_relative, false));

            let is_dir = dir_entry
                .file_type()
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);

            let entry = if is_dir {
                let (target_name, mut attributes) = decode_dir_name(name);

                // INVARIANT: Privacy cascades; everything under a private
                // directory is unreadable to group/other anyway.
                attributes.private |= parent_private;

                let target_path = parent_target.join(&target_name);
                dir_targets.insert(relative.clone(), (target_path.clone(), attributes.private));

                SourceEntry {
                    source_path,
                    target_path,
                    kind: EntryKind::Dir,
                    attributes,
                    run_policy: RunPolicy::None,
                }
            } else {
                let (target_name, mut attributes, run_policy, kind) = decode_file_name(name);
                attributes.private |= parent_private;

                SourceEntry {
                    source_path,
                    target_path: parent_target.join(&target_name),
                    kind,
                    attributes,
                    run_policy,
                }
            };

            // INVARIANT: No two source entries may decode to the same
            // target path; continuing would make the target state depend
            // on apply order.
            if let Some(first) = seen.insert(entry.target_path.clone(), entry.source_path.clone())
            {
                return Err(ScanError::DuplicateTarget {
                    first,
                    second: entry.source_path.clone(),
                    target: entry.target_path.clone(),
                });
            }

            debug!(
                "decoded {:?} -> {:?} ({:?})",
                relative, entry.target_path, entry.kind
            );
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Paths that belong to the tool or its versioning, never to the target.
    fn is_internal(&self, relative: &Path) -> bool {
        let mut components = relative.components();
        match components.next().and_then(|c| c.as_os_str().to_str()) {
            Some(".git") => true,
            Some(IGNORE_FILE) => relative.components().count() == 1,
            _ => false,
        }
    }
}

/// Scanning error types.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Source root is missing or unreadable.
    #[error("cannot read source root {path:?}")]
    SourceRootUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An entry under the source root could not be read.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// A file name the decode table cannot interpret.
    #[error("source entry {path:?} has a non-UTF-8 file name")]
    NonUtf8FileName { path: PathBuf },

    /// Two source entries decode to the same target path.
    #[error("source entries {first:?} and {second:?} both decode to target {target:?}")]
    DuplicateTarget {
        first: PathBuf,
        second: PathBuf,
        target: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = ScanError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;
    use std::fs;

    #[test_case("dot_bashrc", ".bashrc", Attributes::default(); "dot prefix")]
    #[test_case(
        "private_dot_netrc",
        ".netrc",
        Attributes { private: true, ..Default::default() };
        "private dot"
    )]
    #[test_case(
        "executable_dot_local_bin_tool",
        ".local_bin_tool",
        Attributes { executable: true, ..Default::default() };
        "executable dot"
    )]
    #[test_case(
        "encrypted_private_id_rsa",
        "id_rsa",
        Attributes { encrypted: true, private: true, ..Default::default() };
        "encrypted private"
    )]
    #[test_case(
        "dot_gitconfig.tmpl",
        ".gitconfig",
        Attributes { template: true, ..Default::default() };
        "template suffix"
    )]
    #[test]
    fn decode_regular_files(name: &str, target: &str, attributes: Attributes) {
        let (decoded, decoded_attrs, policy, kind) = decode_file_name(name);

        assert_eq!(decoded, target);
        assert_eq!(decoded_attrs, attributes);
        assert_eq!(policy, RunPolicy::None);
        assert_eq!(kind, EntryKind::File);
    }

    #[test_case("run_once_setup.sh", "setup.sh", RunPolicy::Once, false; "run once")]
    #[test_case(
        "run_onchange_install.sh.tmpl",
        "install.sh",
        RunPolicy::OnChange,
        true;
        "run onchange template"
    )]
    #[test]
    fn decode_scripts(name: &str, target: &str, policy: RunPolicy, template: bool) {
        let (decoded, attributes, decoded_policy, kind) = decode_file_name(name);

        assert_eq!(decoded, target);
        assert_eq!(decoded_policy, policy);
        assert_eq!(kind, EntryKind::Script);
        assert_eq!(attributes.template, template);
    }

    #[test]
    fn decode_symlink_entry() {
        let (target, _, policy, kind) = decode_file_name("symlink_dot_vimrc");

        assert_eq!(target, ".vimrc");
        assert_eq!(policy, RunPolicy::None);
        assert_eq!(kind, EntryKind::Symlink);
    }

    #[test_case("exact_bin", "bin", true, false; "exact dir")]
    #[test_case("private_dot_ssh", ".ssh", false, true; "private dot dir")]
    #[test_case("exact_private_dot_cache", ".cache", true, true; "exact private dot dir")]
    #[test]
    fn decode_directories(name: &str, target: &str, exact: bool, private: bool) {
        let (decoded, attributes) = decode_dir_name(name);

        assert_eq!(decoded, target);
        assert_eq!(attributes.exact, exact);
        assert_eq!(attributes.private, private);
    }

    #[test]
    fn decode_unknown_prefix_combination_is_literal() {
        // "private_" out of order after "dot_": nothing special, the name
        // is literal after the leading tokens strip.
        let (target, attributes, policy, kind) = decode_file_name("dot_private_notes");

        assert_eq!(target, ".private_notes");
        assert_eq!(attributes, Attributes::default());
        assert_eq!(policy, RunPolicy::None);
        assert_eq!(kind, EntryKind::File);
    }

    #[test_case(".bashrc", Attributes::default(), "dot_bashrc"; "dot")]
    #[test_case(
        ".netrc",
        Attributes { private: true, ..Default::default() },
        "private_dot_netrc";
        "private dot"
    )]
    #[test_case(
        ".gitconfig",
        Attributes { template: true, ..Default::default() },
        "dot_gitconfig.tmpl";
        "template"
    )]
    #[test]
    fn encode_round_trips_through_decode(name: &str, attributes: Attributes, encoded: &str) {
        assert_eq!(encode_file_name(name, attributes), encoded);

        let (decoded, decoded_attrs, _, _) = decode_file_name(encoded);
        assert_eq!(decoded, name);
        assert_eq!(decoded_attrs, attributes);
    }

    #[test]
    fn scan_decodes_nested_tree_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dot_bashrc"), "export X=1").unwrap();
        fs::create_dir(dir.path().join("private_dot_ssh")).unwrap();
        fs::write(dir.path().join("private_dot_ssh/config.tmpl"), "Host {{ .hostname }}")
            .unwrap();
        fs::write(dir.path().join("run_once_setup.sh"), "#!/bin/sh\n").unwrap();

        let entries = Scanner::new(dir.path()).scan().unwrap();
        let targets: Vec<_> = entries
            .iter()
            .map(|entry| entry.target_path.to_string_lossy().into_owned())
            .collect();

        assert_eq!(targets, vec![".bashrc", ".ssh", ".ssh/config", "setup.sh"]);

        let ssh_config = &entries[2];
        assert_eq!(ssh_config.kind, EntryKind::File);
        assert!(ssh_config.attributes.template);
        assert!(ssh_config.attributes.private, "privacy cascades from the directory");
        assert_eq!(ssh_config.mode(), 0o600);

        let ssh_dir = &entries[1];
        assert_eq!(ssh_dir.kind, EntryKind::Dir);
        assert!(ssh_dir.attributes.private);
        assert_eq!(ssh_dir.mode(), 0o700);
    }

    #[test]
    fn scan_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dot_bashrc"), "a").unwrap();
        fs::write(dir.path().join("dot_zshrc"), "b").unwrap();
        fs::create_dir(dir.path().join("exact_bin")).unwrap();
        fs::write(dir.path().join("exact_bin/tool.sh"), "c").unwrap();

        let scanner = Scanner::new(dir.path());
        let first = scanner.scan().unwrap();
        let second = scanner.scan().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn scan_rejects_duplicate_targets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dot_bashrc"), "a").unwrap();
        fs::write(dir.path().join("dot_bashrc.tmpl"), "b").unwrap();

        let result = Scanner::new(dir.path()).scan();

        assert!(matches!(result, Err(ScanError::DuplicateTarget { .. })));
    }

    #[test]
    fn scan_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let result = Scanner::new(&missing).scan();

        assert!(matches!(
            result,
            Err(ScanError::SourceRootUnreadable { .. })
        ));
    }

    #[test]
    fn scan_honors_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(IGNORE_FILE), "dot_ignored\n").unwrap();
        fs::write(dir.path().join("dot_ignored"), "x").unwrap();
        fs::write(dir.path().join("dot_kept"), "y").unwrap();

        let entries = Scanner::new(dir.path()).scan().unwrap();
        let targets: Vec<_> = entries
            .iter()
            .map(|entry| entry.target_path.to_string_lossy().into_owned())
            .collect();

        assert_eq!(targets, vec![".kept"]);
    }
}
