// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Gated script execution.
//!
//! Scripts are source entries carrying a `run_once_` or `run_onchange_`
//! token. They never land in the target tree; instead they execute after
//! all file synchronization finishes, sequentially, in source-tree lexical
//! order, because one script's side effects may be the next one's
//! precondition.
//!
//! # Run Gates
//!
//! - `run_once_`: gate key is the script *name*. Once a success record
//!   exists, the script never runs again, even if its content changes on a
//!   later apply. Editing a bootstrap script must not re-bootstrap every
//!   machine that already ran it.
//! - `run_onchange_`: gate key is the sha256 hash of the *rendered*
//!   content, so a change flowing in through a template variable re-runs
//!   the script just like an edit does.
//!
//! A record is written (and the store persisted) only after a script exits
//! zero. Failed scripts leave no record and are eligible to retry on the
//! next apply.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::{
    plan::EntryFailure,
    scan::RunPolicy,
    state::StateStore,
};

/// Canonical content hash in the `sha256:<hex>` form.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("sha256:{:x}", hasher.finalize())
}

/// A script with its rendered content, ready for the gate decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptJob {
    /// Decoded script name, the `run_once_` gate key.
    pub name: String,

    /// Absolute source path, for failure reports.
    pub source_path: PathBuf,

    /// Which gate applies.
    pub policy: RunPolicy,

    /// Rendered script body.
    pub content: String,

    /// Hash of the rendered body, the `run_onchange_` gate key.
    pub hash: String,
}

/// Why a script was skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// A `run_once_` script already succeeded on this machine.
    AlreadyRan,

    /// A `run_onchange_` script's rendered content has not changed.
    Unchanged,
}

/// Outcome of one script job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Script executed and exited zero.
    Ran,

    /// Gate decided against running.
    Skipped(SkipReason),

    /// Script executed and failed, or could not be executed at all.
    Failed(EntryFailure),
}

/// Executes script jobs against the persisted run-record store.
pub struct ScriptRunner<'a> {
    store: &'a mut StateStore,
    state_path: &'a Path,
}

impl<'a> ScriptRunner<'a> {
    /// Construct new runner over a loaded store.
    pub fn new(store: &'a mut StateStore, state_path: &'a Path) -> Self {
        Self { store, state_path }
    }

    /// Decide whether a job's gate permits execution.
    pub fn gate(store: &StateStore, job: &ScriptJob) -> Option<SkipReason> {
        match job.policy {
            RunPolicy::None => None,
            RunPolicy::Once => store.record(&job.name).map(|_| SkipReason::AlreadyRan),
            RunPolicy::OnChange => store
                .record(&job.name)
                .filter(|record| record.hash == job.hash)
                .map(|_| SkipReason::Unchanged),
        }
    }

    /// Run all jobs sequentially, updating the store after each success.
    ///
    /// The store is persisted to disk after every successful script, so a
    /// crash between scripts never forgets a completed run.
    #[instrument(skip(self, jobs), level = "debug")]
    pub fn run_all(&mut self, jobs: &[ScriptJob]) -> Vec<ScriptOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());

        for job in jobs {
            if let Some(reason) = Self::gate(self.store, job) {
                debug!("skip script {:?}: {reason:?}", job.name);
                outcomes.push(ScriptOutcome::Skipped(reason));
                continue;
            }

            info!("run script {:?}", job.name);
            match execute(job) {
                Ok(output) => {
                    if !output.is_empty() {
                        info!("script {:?} output:\n{output}", job.name);
                    }

                    self.store.upsert(&job.name, &job.hash);
                    if let Err(err) = self.store.save(self.state_path) {
                        // The run itself succeeded; losing the record only
                        // means a spurious re-run later.
                        warn!("cannot persist run record for {:?}: {err}", job.name);
                    }

                    outcomes.push(ScriptOutcome::Ran);
                }
                Err(cause) => {
                    warn!("script {:?} failed: {cause}", job.name);
                    outcomes.push(ScriptOutcome::Failed(EntryFailure {
                        source_path: job.source_path.clone(),
                        target_path: PathBuf::from(&job.name),
                        cause,
                    }));
                }
            }
        }

        outcomes
    }
}

/// Execute one script through the host shell, capturing output.
///
/// The rendered body is written to a private temporary file and handed to
/// `sh`. Stdout and stderr are folded together into one message, in
/// arrival-agnostic order (stdout first), with trailing newlines chomped.
fn execute(job: &ScriptJob) -> Result<String, String> {
    let mut temp = tempfile::Builder::new()
        .prefix(".dotsmith-script-")
        .tempfile()
        .map_err(|err| format!("cannot stage script: {err}"))?;
    temp.write_all(job.content.as_bytes())
        .map_err(|err| format!("cannot stage script: {err}"))?;

    let output = Command::new("sh")
        .arg(temp.path())
        .output()
        .map_err(|err| format!("cannot spawn sh: {err}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(&stdout);
    }

    if !stderr.is_empty() {
        message.push_str(&stderr);
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message);

    if !output.status.success() {
        return Err(format!(
            "exited with {}:\n{message}",
            output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string())
        ));
    }

    Ok(message)
}
