// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sync strategy resolution.
//!
//! A sync either pushes and makes the target pull by itself, or hands the job
//! to a chain of hook phases. The custom chain runs, in order:
//!
//! 1. `pre-sync` hooks in `apps/common`.
//! 2. `pre-sync` hooks in `apps/<env>`.
//! 3. Hooks in `sync` whose phase is the environment name, or `default`.
//! 4. `post-sync` hooks in `apps/<env>`.
//! 5. `post-sync` hooks in `apps/common`.
//!
//! Release mode stops after the pre-sync phases and leaves the rest of the
//! deployment to `finish`.

use crate::{engine::SyncOptions, path::HookLayout};

use std::path::PathBuf;

/// Phase of hooks run before sync hooks.
pub const PRE_SYNC: &str = "pre-sync";

/// Phase of hooks run after sync hooks.
pub const POST_SYNC: &str = "post-sync";

/// Phase of sync hooks when no environment is given.
pub const DEFAULT_SYNC: &str = "default";

/// How a sync ships the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Show hook sources of the custom chain without running anything.
    DryRun,

    /// Push, then make the target pull.
    Default,

    /// Run the full custom hook chain.
    Custom,

    /// Run pre-sync phases only, keep deployment open for `finish`.
    Release,
}

impl SyncStrategy {
    pub fn resolve(options: &SyncOptions) -> Self {
        if options.dry_run {
            Self::DryRun
        } else if options.release {
            Self::Release
        } else if options.default {
            Self::Default
        } else {
            Self::Custom
        }
    }
}

/// One hook phase of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseStep {
    pub dir: PathBuf,
    pub phase: String,

    /// Directory must exist.
    pub required: bool,
}

impl PhaseStep {
    fn new(dir: PathBuf, phase: &str, required: bool) -> Self {
        Self {
            dir,
            phase: phase.into(),
            required,
        }
    }
}

/// Phases of the custom chain.
pub fn custom_chain(layout: &HookLayout, env: Option<&str>) -> Vec<PhaseStep> {
    let mut steps = pre_sync_steps(layout, env);
    steps.push(PhaseStep::new(
        layout.sync(),
        env.unwrap_or(DEFAULT_SYNC),
        false,
    ));
    if let Some(env) = env {
        steps.push(PhaseStep::new(layout.env(env), POST_SYNC, true));
    }
    steps.push(PhaseStep::new(layout.common(), POST_SYNC, false));

    steps
}

/// Phases run by release mode.
pub fn release_chain(layout: &HookLayout, env: Option<&str>) -> Vec<PhaseStep> {
    pre_sync_steps(layout, env)
}

fn pre_sync_steps(layout: &HookLayout, env: Option<&str>) -> Vec<PhaseStep> {
    let mut steps = vec![PhaseStep::new(layout.common(), PRE_SYNC, false)];
    if let Some(env) = env {
        // INVARIANT: Explicitly requested environment must have hooks.
        steps.push(PhaseStep::new(layout.env(env), PRE_SYNC, true));
    }

    steps
}
