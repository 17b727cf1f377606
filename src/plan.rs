// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Apply planning.
//!
//! Planning turns the scanned source tree into a concrete list of
//! [`ApplyAction`]s by comparing desired state against whatever the target
//! directory currently holds. The planner mutates nothing: `diff` and
//! `status` consume the plan as-is, and `apply` hands it to the executor.
//!
//! # Content Pipeline
//!
//! Per entry, content is produced in a fixed order: decrypt (for
//! `encrypted_` entries), render (for `.tmpl` entries), then hash. Only
//! after that does the decoded name decide target path and permissions.
//!
//! # Failure Semantics
//!
//! An unreadable source file is fatal: the plan must describe the whole
//! tree or nothing. A failed decrypt or render only poisons its own entry;
//! the failure is recorded on the plan and the remaining entries proceed.
//! Duplicate targets never reach the planner, the scanner rejects them.
//!
//! # Action Ordering
//!
//! Directories come first, parents before children (walk order already
//! guarantees this). File and symlink writes follow. Removes from `exact_`
//! directories run last, so a rename-style change (delete one name, write
//! another) never drops a file it was about to replace.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use glob::Pattern;
use tracing::{debug, instrument, warn};

use crate::{
    scan::{EntryKind, SourceEntry},
    script::{content_hash, ScriptJob},
    template::Renderer,
    vault::Vault,
    fsutil,
};

/// One planned mutation of the target tree.
///
/// Target paths are relative to the target root; the executor joins them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyAction {
    /// Create a directory, or fix its permissions if it already exists.
    CreateDir { target: PathBuf, mode: u32 },

    /// Write a file with final content and permissions.
    WriteFile {
        source: PathBuf,
        target: PathBuf,
        content: Vec<u8>,
        mode: u32,
        /// Whether the target is newly created rather than replaced.
        created: bool,
    },

    /// Fix permissions on an otherwise up-to-date file.
    SetMode { target: PathBuf, mode: u32 },

    /// Point a symlink at a new destination.
    CreateSymlink {
        source: PathBuf,
        target: PathBuf,
        dest: PathBuf,
    },

    /// Delete a stray path under an `exact_` directory.
    Remove { target: PathBuf },
}

impl ApplyAction {
    /// Target path the action touches, relative to the target root.
    pub fn target(&self) -> &Path {
        match self {
            Self::CreateDir { target, .. }
            | Self::WriteFile { target, .. }
            | Self::SetMode { target, .. }
            | Self::CreateSymlink { target, .. }
            | Self::Remove { target } => target,
        }
    }
}

/// A per-entry failure recorded during planning or apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryFailure {
    /// Source path of the failed entry, when one exists.
    pub source_path: PathBuf,

    /// Decoded target path of the failed entry.
    pub target_path: PathBuf,

    /// Human-readable cause.
    pub cause: String,
}

/// Complete plan for one invocation.
#[derive(Debug, Default)]
pub struct Plan {
    /// Ordered actions for the executor.
    pub actions: Vec<ApplyAction>,

    /// Scripts whose gates still need consulting.
    pub scripts: Vec<ScriptJob>,

    /// Entries that failed to plan.
    pub failures: Vec<EntryFailure>,
}

impl Plan {
    /// True when nothing would change and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.actions.is_empty() && self.failures.is_empty()
    }
}

/// Plans target mutations by diffing desired state against the live tree.
pub struct Planner<'a, V: Vault> {
    target_root: PathBuf,
    renderer: Renderer<'a>,
    vault: &'a V,
}

impl<'a, V: Vault> Planner<'a, V> {
    /// Construct new planner.
    pub fn new(target_root: impl Into<PathBuf>, renderer: Renderer<'a>, vault: &'a V) -> Self {
        Self {
            target_root: target_root.into(),
            renderer,
            vault,
        }
    }

    /// Compute the apply plan for the scanned entries.
    ///
    /// `filters` narrows which entries may produce actions; an empty slice
    /// selects everything. Stray detection under `exact_` directories
    /// always consults the full entry list, so filtering can never widen
    /// what counts as stray.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::SourceUnreadable`] if a source file cannot be
    ///   read; the plan is abandoned entirely.
    #[instrument(skip(self, entries, filters), level = "debug")]
    pub fn plan(&self, entries: &[SourceEntry], filters: &[Pattern]) -> Result<Plan> {
        let mut dirs = Vec::new();
        let mut writes = Vec::new();
        let mut removes = Vec::new();
        let mut plan = Plan::default();

        // Every decoded target backs the stray check, filtered or not.
        let backed: HashSet<PathBuf> = entries
            .iter()
            .filter(|entry| entry.kind != EntryKind::Script)
            .map(|entry| entry.target_path.clone())
            .collect();

        for entry in entries {
            if !selected(entry, filters) {
                continue;
            }

            match entry.kind {
                EntryKind::Dir => {
                    if let Some(action) = self.plan_dir(entry) {
                        dirs.push(action);
                    }
                    if entry.attributes.exact {
                        self.plan_exact_strays(entry, &backed, &mut removes, &mut plan.failures);
                    }
                }
                EntryKind::File => {
                    self.plan_file(entry, &mut writes, &mut plan.failures)?;
                }
                EntryKind::Symlink => {
                    self.plan_symlink(entry, &mut writes, &mut plan.failures)?;
                }
                EntryKind::Script => {
                    self.plan_script(entry, &mut plan.scripts, &mut plan.failures)?;
                }
            }
        }

        plan.actions.extend(dirs);
        plan.actions.extend(writes);
        plan.actions.extend(removes);

        debug!(
            "planned {} actions, {} scripts, {} failures",
            plan.actions.len(),
            plan.scripts.len(),
            plan.failures.len()
        );

        Ok(plan)
    }

    fn plan_dir(&self, entry: &SourceEntry) -> Option<ApplyAction> {
        let absolute = self.target_root.join(&entry.target_path);
        let mode = entry.mode();

        match fs::symlink_metadata(&absolute) {
            Ok(metadata) if metadata.is_dir() => match fsutil::read_mode(&metadata) {
                Some(current) if current != mode => Some(ApplyAction::CreateDir {
                    target: entry.target_path.clone(),
                    mode,
                }),
                _ => None,
            },
            // Wrong kind or missing either way; the executor clears
            // conflicts before creating.
            _ => Some(ApplyAction::CreateDir {
                target: entry.target_path.clone(),
                mode,
            }),
        }
    }

    fn plan_file(
        &self,
        entry: &SourceEntry,
        writes: &mut Vec<ApplyAction>,
        failures: &mut Vec<EntryFailure>,
    ) -> Result<()> {
        let content = match self.produce_content(entry)? {
            Ok(content) => content,
            Err(cause) => {
                warn!("entry {:?} failed to plan: {cause}", entry.source_path);
                failures.push(failure(entry, cause));
                return Ok(());
            }
        };

        let absolute = self.target_root.join(&entry.target_path);
        let mode = entry.mode();

        match fs::symlink_metadata(&absolute) {
            Ok(metadata) if metadata.is_file() => {
                let current = match fs::read(&absolute) {
                    Ok(current) => current,
                    Err(err) => {
                        failures.push(failure(entry, format!("cannot read target: {err}")));
                        return Ok(());
                    }
                };

                if current != content {
                    writes.push(ApplyAction::WriteFile {
                        source: entry.source_path.clone(),
                        target: entry.target_path.clone(),
                        content,
                        mode,
                        created: false,
                    });
                } else if let Some(current_mode) = fsutil::read_mode(&metadata) {
                    if current_mode != mode {
                        writes.push(ApplyAction::SetMode {
                            target: entry.target_path.clone(),
                            mode,
                        });
                    }
                }
            }
            Ok(_) => {
                // Symlink or directory where a file belongs.
                writes.push(ApplyAction::WriteFile {
                    source: entry.source_path.clone(),
                    target: entry.target_path.clone(),
                    content,
                    mode,
                    created: false,
                });
            }
            Err(_) => {
                writes.push(ApplyAction::WriteFile {
                    source: entry.source_path.clone(),
                    target: entry.target_path.clone(),
                    content,
                    mode,
                    created: true,
                });
            }
        }

        Ok(())
    }

    fn plan_symlink(
        &self,
        entry: &SourceEntry,
        writes: &mut Vec<ApplyAction>,
        failures: &mut Vec<EntryFailure>,
    ) -> Result<()> {
        let content = match self.produce_content(entry)? {
            Ok(content) => content,
            Err(cause) => {
                failures.push(failure(entry, cause));
                return Ok(());
            }
        };

        let dest = match String::from_utf8(content) {
            Ok(dest) => PathBuf::from(dest.trim()),
            Err(_) => {
                failures.push(failure(entry, "symlink destination is not UTF-8".into()));
                return Ok(());
            }
        };

        let absolute = self.target_root.join(&entry.target_path);
        match fs::read_link(&absolute) {
            Ok(current) if current == dest => {}
            _ => writes.push(ApplyAction::CreateSymlink {
                source: entry.source_path.clone(),
                target: entry.target_path.clone(),
                dest,
            }),
        }

        Ok(())
    }

    fn plan_script(
        &self,
        entry: &SourceEntry,
        scripts: &mut Vec<ScriptJob>,
        failures: &mut Vec<EntryFailure>,
    ) -> Result<()> {
        let content = match self.produce_content(entry)? {
            Ok(content) => content,
            Err(cause) => {
                failures.push(failure(entry, cause));
                return Ok(());
            }
        };

        let content = match String::from_utf8(content) {
            Ok(content) => content,
            Err(_) => {
                failures.push(failure(entry, "script content is not UTF-8".into()));
                return Ok(());
            }
        };

        scripts.push(ScriptJob {
            name: entry.script_name(),
            source_path: entry.source_path.clone(),
            policy: entry.run_policy,
            hash: content_hash(content.as_bytes()),
            content,
        });

        Ok(())
    }

    /// Decrypt and render an entry's source content, in that order.
    ///
    /// The outer result is fatal (unreadable source file); the inner one
    /// is the per-entry failure cause.
    fn produce_content(&self, entry: &SourceEntry) -> Result<Result<Vec<u8>, String>> {
        let raw = fs::read(&entry.source_path).map_err(|err| PlanError::SourceUnreadable {
            path: entry.source_path.clone(),
            source: err,
        })?;

        let decrypted = if entry.attributes.encrypted {
            match self.vault.decrypt(&raw) {
                Ok(plaintext) => plaintext,
                Err(err) => return Ok(Err(err.to_string())),
            }
        } else {
            raw
        };

        if !entry.attributes.template {
            return Ok(Ok(decrypted));
        }

        let text = match String::from_utf8(decrypted) {
            Ok(text) => text,
            Err(_) => return Ok(Err("template content is not UTF-8".into())),
        };

        let name = entry.source_path.to_string_lossy().into_owned();
        match self.renderer.render(name, &text) {
            Ok(rendered) => Ok(Ok(rendered.into_bytes())),
            Err(err) => Ok(Err(err.to_string())),
        }
    }

    /// Emit removes for live paths under an `exact_` directory that no
    /// source entry backs.
    fn plan_exact_strays(
        &self,
        entry: &SourceEntry,
        backed: &HashSet<PathBuf>,
        removes: &mut Vec<ApplyAction>,
        failures: &mut Vec<EntryFailure>,
    ) {
        let mut pending = vec![entry.target_path.clone()];

        while let Some(dir_relative) = pending.pop() {
            let absolute = self.target_root.join(&dir_relative);
            let reader = match fs::read_dir(&absolute) {
                Ok(reader) => reader,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    failures.push(failure(entry, format!("cannot list {absolute:?}: {err}")));
                    continue;
                }
            };

            for child in reader {
                let child = match child {
                    Ok(child) => child,
                    Err(err) => {
                        failures.push(failure(entry, format!("cannot list {absolute:?}: {err}")));
                        continue;
                    }
                };

                let child_relative = dir_relative.join(child.file_name());
                if backed.contains(&child_relative) {
                    // INVARIANT: Only descend into backed directories; a
                    // stray directory goes in one piece.
                    if child.path().is_dir() {
                        pending.push(child_relative);
                    }
                } else {
                    debug!("stray {:?} under exact directory", child_relative);
                    removes.push(ApplyAction::Remove {
                        target: child_relative,
                    });
                }
            }
        }
    }
}

fn failure(entry: &SourceEntry, cause: String) -> EntryFailure {
    EntryFailure {
        source_path: entry.source_path.clone(),
        target_path: entry.target_path.clone(),
        cause,
    }
}

/// True when the entry's target matches the filter set.
fn selected(entry: &SourceEntry, filters: &[Pattern]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|pattern| {
        entry
            .target_path
            .ancestors()
            .any(|ancestor| !ancestor.as_os_str().is_empty() && pattern.matches_path(ancestor))
    })
}

/// Planning error types.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A source file could not be read; no partial plan is produced.
    #[error("cannot read source entry {path:?}")]
    SourceUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = PlanError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::{RenderContext, Value},
        scan::Scanner,
        vault::fake::FakeVault,
    };
    use pretty_assertions::assert_eq;
    use std::fs;

    fn context() -> RenderContext {
        RenderContext::from_values([(
            "hostname".to_string(),
            Value::String("laptop1".into()),
        )])
    }

    fn plan_tree(
        source: &Path,
        target: &Path,
        context: &RenderContext,
        vault: &FakeVault,
    ) -> Plan {
        let entries = Scanner::new(source).scan().unwrap();
        Planner::new(target, Renderer::new(context), vault)
            .plan(&entries, &[])
            .unwrap()
    }

    #[test]
    fn plan_creates_missing_file() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(source.path().join("dot_bashrc"), "export X=1").unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        assert_eq!(
            plan.actions,
            vec![ApplyAction::WriteFile {
                source: source.path().join("dot_bashrc"),
                target: PathBuf::from(".bashrc"),
                content: b"export X=1".to_vec(),
                mode: 0o644,
                created: true,
            }]
        );
        assert!(plan.failures.is_empty());
    }

    #[test]
    fn plan_renders_template_with_context() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::create_dir(source.path().join("private_dot_ssh")).unwrap();
        fs::write(
            source.path().join("private_dot_ssh/config.tmpl"),
            "Host {{ .hostname }}",
        )
        .unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        assert_eq!(plan.actions.len(), 2);
        assert_eq!(
            plan.actions[0],
            ApplyAction::CreateDir {
                target: PathBuf::from(".ssh"),
                mode: 0o700,
            }
        );
        assert_eq!(
            plan.actions[1],
            ApplyAction::WriteFile {
                source: source.path().join("private_dot_ssh/config.tmpl"),
                target: PathBuf::from(".ssh/config"),
                content: b"Host laptop1".to_vec(),
                mode: 0o600,
                created: true,
            }
        );
    }

    #[test]
    fn plan_decrypts_before_rendering() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(
            source.path().join("encrypted_dot_netrc.tmpl"),
            FakeVault::seal(b"machine {{ .hostname }}"),
        )
        .unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        assert_eq!(plan.actions.len(), 1);
        let ApplyAction::WriteFile { content, .. } = &plan.actions[0] else {
            panic!("expected a write action");
        };
        assert_eq!(content, b"machine laptop1");
    }

    #[test]
    fn plan_failed_decrypt_poisons_only_its_entry() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(source.path().join("dot_bashrc"), "export X=1").unwrap();
        fs::write(source.path().join("encrypted_dot_netrc"), b"garbage").unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.failures.len(), 1);
        assert_eq!(plan.failures[0].target_path, PathBuf::from(".netrc"));
    }

    #[test]
    fn plan_render_failure_names_variable() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(source.path().join("dot_rc.tmpl"), "{{ .missing }}").unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        assert!(plan.actions.is_empty());
        assert_eq!(plan.failures.len(), 1);
        assert!(plan.failures[0].cause.contains("missing"));
    }

    #[test]
    fn plan_is_idempotent_after_apply_shape() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(source.path().join("dot_bashrc"), "export X=1").unwrap();
        // Pretend a previous apply already wrote the file.
        fs::write(target.path().join(".bashrc"), "export X=1").unwrap();
        crate::fsutil::chmod(&target.path().join(".bashrc"), 0o644).unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        assert!(plan.is_clean());
    }

    #[test]
    fn plan_exact_dir_removes_strays_only() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::create_dir(source.path().join("exact_bin")).unwrap();
        fs::write(source.path().join("exact_bin/tool.sh"), "tool").unwrap();
        fs::create_dir(target.path().join("bin")).unwrap();
        fs::write(target.path().join("bin/tool.sh"), "tool").unwrap();
        fs::write(target.path().join("bin/old.sh"), "stale").unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        // tool.sh matches, bin exists with default mode: only the stray
        // remove (and possibly a dir chmod) remains.
        assert!(plan
            .actions
            .iter()
            .any(|action| matches!(action, ApplyAction::Remove { target } if target == Path::new("bin/old.sh"))));
        assert!(!plan
            .actions
            .iter()
            .any(|action| matches!(action, ApplyAction::WriteFile { target, .. } if target == Path::new("bin/tool.sh"))));
    }

    #[test]
    fn plan_scripts_carry_rendered_hash() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(
            source.path().join("run_onchange_install.sh.tmpl"),
            "echo {{ .hostname }}",
        )
        .unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        assert!(plan.actions.is_empty());
        assert_eq!(plan.scripts.len(), 1);
        assert_eq!(plan.scripts[0].content, "echo laptop1");
        assert_eq!(plan.scripts[0].hash, content_hash(b"echo laptop1"));
        assert_eq!(plan.scripts[0].name, "install.sh");
    }

    #[test]
    fn plan_filters_select_by_target_prefix() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(source.path().join("dot_bashrc"), "a").unwrap();
        fs::create_dir(source.path().join("dot_config")).unwrap();
        fs::write(source.path().join("dot_config/foo.conf"), "b").unwrap();

        let entries = Scanner::new(source.path()).scan().unwrap();
        let context = context();
        let vault = FakeVault::new();
        let planner = Planner::new(target.path(), Renderer::new(&context), &vault);

        let plan = planner
            .plan(&entries, &[Pattern::new(".config").unwrap()])
            .unwrap();

        let targets: Vec<_> = plan
            .actions
            .iter()
            .map(|action| action.target().to_path_buf())
            .collect();
        assert_eq!(
            targets,
            vec![PathBuf::from(".config"), PathBuf::from(".config/foo.conf")]
        );
    }

    #[test]
    fn plan_mode_only_drift_emits_set_mode() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::write(source.path().join("private_dot_netrc"), "machine x").unwrap();
        fs::write(target.path().join(".netrc"), "machine x").unwrap();
        crate::fsutil::chmod(&target.path().join(".netrc"), 0o644).unwrap();

        let context = context();
        let vault = FakeVault::new();
        let plan = plan_tree(source.path(), target.path(), &context, &vault);

        #[cfg(unix)]
        {
            assert_eq!(plan.actions.len(), 1);
            assert_eq!(
                plan.actions[0],
                ApplyAction::SetMode {
                    target: PathBuf::from(".netrc"),
                    mode: 0o600,
                }
            );
        }
    }
}
