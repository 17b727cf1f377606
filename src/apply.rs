// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Plan execution and reporting.
//!
//! The executor consumes an apply plan one action at a time. Every file
//! write is atomic, so interrupting an apply at any point leaves each
//! individual target either fully old or fully new, and re-running simply
//! plans whatever remains. A failed action is recorded and skipped; only a
//! broken environment (target root missing or unwritable) aborts the run,
//! checked up front before anything mutates.
//!
//! Dry-run output lives here too: `diff` renders unified diffs of pending
//! writes and `status` renders a one-line summary per differing entry,
//! neither touching the filesystem.

use std::{
    fs,
    path::{Path, PathBuf},
};

use indicatif::{ProgressBar, ProgressStyle};
use similar::TextDiff;
use tracing::{debug, info, instrument, warn};

use crate::{
    fsutil,
    plan::{ApplyAction, EntryFailure, Plan},
    script::{ScriptJob, ScriptOutcome, ScriptRunner},
    state::StateStore,
};

/// Aggregate outcome of one apply run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Actions that completed.
    pub applied: usize,

    /// Scripts that executed successfully.
    pub scripts_ran: usize,

    /// Scripts whose gate decided against running.
    pub scripts_skipped: usize,

    /// Everything that failed: planning, actions, and scripts.
    pub failures: Vec<EntryFailure>,
}

impl ApplyReport {
    /// Fold script outcomes into the report.
    pub fn absorb_scripts(&mut self, outcomes: Vec<ScriptOutcome>) {
        for outcome in outcomes {
            match outcome {
                ScriptOutcome::Ran => self.scripts_ran += 1,
                ScriptOutcome::Skipped(_) => self.scripts_skipped += 1,
                ScriptOutcome::Failed(failure) => self.failures.push(failure),
            }
        }
    }

    /// Final summary line.
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed",
            self.applied + self.scripts_ran,
            self.failures.len()
        )
    }

    /// True when nothing failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Executes apply plans against the target root.
pub struct Executor {
    target_root: PathBuf,
}

impl Executor {
    /// Construct new executor over a target root.
    pub fn new(target_root: impl Into<PathBuf>) -> Self {
        Self {
            target_root: target_root.into(),
        }
    }

    /// Verify the target root exists and is writable.
    ///
    /// Runs before any mutation so a broken environment aborts the whole
    /// run instead of failing every action one by one.
    ///
    /// # Errors
    ///
    /// - Return [`ApplyError::TargetRootUnwritable`] if the root is
    ///   missing, not a directory, or rejects writes.
    pub fn preflight(&self) -> Result<()> {
        let unwritable = |source: std::io::Error| ApplyError::TargetRootUnwritable {
            path: self.target_root.clone(),
            source,
        };

        let metadata = fs::metadata(&self.target_root).map_err(unwritable)?;
        if !metadata.is_dir() {
            return Err(unwritable(std::io::Error::other("not a directory")));
        }

        tempfile::Builder::new()
            .prefix(".dotsmith-probe-")
            .tempfile_in(&self.target_root)
            .map(drop)
            .map_err(unwritable)
    }

    /// Execute all actions of a plan, continuing past individual failures.
    ///
    /// Returns a report seeded with the plan's own failures. Scripts are
    /// not run here; the caller gates and runs them after the writes.
    #[instrument(skip(self, plan), level = "debug")]
    pub fn execute(&self, plan: &Plan) -> Result<ApplyReport> {
        self.preflight()?;

        let mut report = ApplyReport {
            failures: plan.failures.clone(),
            ..Default::default()
        };

        let bar = progress_bar(plan.actions.len());
        for action in &plan.actions {
            bar.set_message(action.target().display().to_string());

            match self.execute_action(action) {
                Ok(()) => report.applied += 1,
                Err(cause) => {
                    bar.suspend(|| warn!("action on {:?} failed: {cause}", action.target()));
                    report.failures.push(EntryFailure {
                        source_path: action_source(action),
                        target_path: action.target().to_path_buf(),
                        cause,
                    });
                }
            }

            bar.inc(1);
        }
        bar.finish_and_clear();

        info!("{} actions applied", report.applied);

        Ok(report)
    }

    fn execute_action(&self, action: &ApplyAction) -> Result<(), String> {
        let absolute = self.target_root.join(action.target());
        debug!("execute {action:?}");

        match action {
            ApplyAction::CreateDir { mode, .. } => {
                clear_conflict(&absolute, ConflictKeep::Dir)?;
                fsutil::ensure_dir(&absolute, *mode).map_err(|err| err.to_string())
            }
            ApplyAction::WriteFile { content, mode, .. } => {
                clear_conflict(&absolute, ConflictKeep::File)?;
                fsutil::write_atomic(&absolute, content, *mode).map_err(|err| err.to_string())
            }
            ApplyAction::SetMode { mode, .. } => {
                fsutil::chmod(&absolute, *mode).map_err(|err| err.to_string())
            }
            ApplyAction::CreateSymlink { dest, .. } => {
                clear_conflict(&absolute, ConflictKeep::File)?;
                fsutil::symlink_atomic(&absolute, dest).map_err(|err| err.to_string())
            }
            ApplyAction::Remove { .. } => match fs::symlink_metadata(&absolute) {
                // Already gone; removal is idempotent.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                _ => fsutil::remove_any(&absolute).map_err(|err| err.to_string()),
            },
        }
    }
}

/// What an action expects to find at its target path.
enum ConflictKeep {
    Dir,
    File,
}

/// Remove a target that exists as the wrong kind of object.
///
/// Atomic rename replaces files and symlinks on its own; only a directory
/// in the way of a file (or the reverse) needs clearing first.
fn clear_conflict(absolute: &Path, keep: ConflictKeep) -> Result<(), String> {
    let Ok(metadata) = fs::symlink_metadata(absolute) else {
        return Ok(());
    };

    let conflicting = match keep {
        ConflictKeep::Dir => !metadata.is_dir(),
        ConflictKeep::File => metadata.is_dir(),
    };

    if conflicting {
        fsutil::remove_any(absolute).map_err(|err| err.to_string())?;
    }

    Ok(())
}

fn action_source(action: &ApplyAction) -> PathBuf {
    match action {
        ApplyAction::WriteFile { source, .. } | ApplyAction::CreateSymlink { source, .. } => {
            source.clone()
        }
        _ => PathBuf::new(),
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    if len == 0 {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}] {pos}/{len}",
    ) {
        bar.set_style(style.progress_chars("-Cco."));
    }

    bar
}

/// Run a plan's scripts through their gates, in order.
pub fn run_scripts(
    jobs: &[ScriptJob],
    store: &mut StateStore,
    state_path: &Path,
) -> Vec<ScriptOutcome> {
    ScriptRunner::new(store, state_path).run_all(jobs)
}

/// Render unified diffs for everything the plan would change.
///
/// Pure presentation: reads the current target content for context but
/// mutates nothing.
pub fn render_diff(plan: &Plan, target_root: &Path, store: &StateStore) -> String {
    let mut out = String::new();

    for action in &plan.actions {
        match action {
            ApplyAction::CreateDir { target, mode } => {
                out.push_str(&format!("+ dir {} (mode {mode:o})\n", target.display()));
            }
            ApplyAction::WriteFile {
                target,
                content,
                created,
                ..
            } => {
                let old = if *created {
                    String::new()
                } else {
                    fs::read_to_string(target_root.join(target)).unwrap_or_default()
                };

                match std::str::from_utf8(content) {
                    Ok(new) => {
                        let label = target.display().to_string();
                        let diff = TextDiff::from_lines(old.as_str(), new);
                        out.push_str(
                            &diff
                                .unified_diff()
                                .context_radius(3)
                                .header(&format!("a/{label}"), &format!("b/{label}"))
                                .to_string(),
                        );
                    }
                    Err(_) => {
                        out.push_str(&format!("~ binary {}\n", target.display()));
                    }
                }
            }
            ApplyAction::SetMode { target, mode } => {
                out.push_str(&format!("~ mode {} -> {mode:o}\n", target.display()));
            }
            ApplyAction::CreateSymlink { target, dest, .. } => {
                out.push_str(&format!(
                    "~ link {} -> {}\n",
                    target.display(),
                    dest.display()
                ));
            }
            ApplyAction::Remove { target } => {
                out.push_str(&format!("- remove {}\n", target.display()));
            }
        }
    }

    for job in &plan.scripts {
        if ScriptRunner::gate(store, job).is_none() {
            out.push_str(&format!("! script {} would run\n", job.name));
        }
    }

    out
}

/// Render one status line per differing entry.
pub fn render_status(plan: &Plan, store: &StateStore) -> String {
    let mut out = String::new();

    for action in &plan.actions {
        let line = match action {
            ApplyAction::CreateDir { target, .. } => format!("A  {}/", target.display()),
            ApplyAction::WriteFile {
                target, created, ..
            } => {
                let marker = if *created { 'A' } else { 'M' };
                format!("{marker}  {}", target.display())
            }
            ApplyAction::SetMode { target, .. } => format!("M  {}", target.display()),
            ApplyAction::CreateSymlink { target, .. } => format!("M  {}", target.display()),
            ApplyAction::Remove { target } => format!("D  {}", target.display()),
        };
        out.push_str(&line);
        out.push('\n');
    }

    for job in &plan.scripts {
        if ScriptRunner::gate(store, job).is_none() {
            out.push_str(&format!("R  {}\n", job.name));
        }
    }

    out
}

/// Apply error types. All fatal; per-action failures go in the report.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Target root is missing, not a directory, or rejects writes.
    #[error("target root {path:?} is not writable")]
    TargetRootUnwritable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = ApplyError> = std::result::Result<T, E>;
