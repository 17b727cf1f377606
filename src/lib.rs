// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotsmith: a declarative dotfile-state synchronizer.
//!
//! Dotsmith keeps a target directory, usually the user's home directory, in
//! sync with a declarative source-of-truth tree. Source filenames encode
//! target metadata through a fixed prefix/suffix vocabulary (`dot_`,
//! `private_`, `exact_`, `encrypted_`, `run_once_`, `run_onchange_`,
//! `.tmpl`, and friends), so the tree itself is the manifest.
//!
//! # Pipeline
//!
//! One invocation runs a single sequential pipeline:
//!
//! 1. [`scan`] walks the source tree and decodes every filename into a
//!    [`scan::SourceEntry`].
//! 2. [`template`] expands `.tmpl` entries against the [`context`] built
//!    from environment probes and configuration data.
//! 3. [`vault`] decrypts `encrypted_` entries through GPG.
//! 4. [`plan`] diffs desired state against the live target tree into an
//!    ordered action list.
//! 5. [`apply`] executes the plan with atomic per-file writes, then hands
//!    scripts to [`script`], whose run gates consult the persisted
//!    [`state`] store.
//!
//! The target directory is one shared mutable resource, so there is no
//! concurrency anywhere in the pipeline; crash-safety comes from atomic
//! writes, and re-running after an interruption just picks up the
//! remaining diff.

pub mod apply;
pub mod config;
pub mod context;
pub mod fsutil;
pub mod path;
pub mod plan;
pub mod scan;
pub mod script;
pub mod state;
pub mod template;
pub mod vault;

pub use apply::{ApplyReport, Executor};
pub use config::Config;
pub use context::RenderContext;
pub use plan::{Plan, Planner};
pub use scan::Scanner;
pub use state::StateStore;
pub use template::Renderer;
pub use vault::{GpgVault, Vault};
