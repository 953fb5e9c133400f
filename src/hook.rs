// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Hook orchestration.
//!
//! Hooks are executable files grouped into directories. The first
//! dot-delimited segment of a hook's file name is its __phase__, e.g.,
//! `pre-sync.push.sh` belongs to the `pre-sync` phase. Running a phase runs
//! every hook of that phase in lexicographic order of file name, stopping at
//! the first failure.
//!
//! Hooks run as standalone processes, not through a shell. Each hook receives
//! the remote and branch being synced as arguments, and the rest of the
//! deployment context as `GIT_DEPLOY_*` environment variables.

use std::{
    ffi::OsStr,
    fs::{read, read_dir},
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};
use tracing::{debug, info, instrument};

/// Deployment context handed to every hook.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub repo: String,
    pub tag: Option<String>,
    pub remote: String,
    pub branch: String,
    pub env: Option<String>,
    pub force: bool,
}

impl HookContext {
    /// Positional arguments of every hook.
    pub fn args(&self) -> [&str; 2] {
        [self.remote.as_str(), self.branch.as_str()]
    }

    /// Environment variables of every hook.
    pub fn envs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("GIT_DEPLOY_REPO", self.repo.clone()),
            ("GIT_DEPLOY_TAG", self.tag.clone().unwrap_or_default()),
            ("GIT_DEPLOY_REMOTE", self.remote.clone()),
            ("GIT_DEPLOY_BRANCH", self.branch.clone()),
            ("GIT_DEPLOY_ENV", self.env.clone().unwrap_or_default()),
            ("GIT_DEPLOY_FORCE", u8::from(self.force).to_string()),
        ]
    }
}

/// What happened to one hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Hook ran and exited successfully.
    Executed { output: String },

    /// Hook was not run, its source is shown instead.
    Previewed { source: Vec<u8> },
}

/// Report of one hook of a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    pub path: PathBuf,
    pub outcome: HookOutcome,
}

/// Runs phases of hooks.
#[derive(Debug, Clone)]
pub struct HookRunner {
    context: HookContext,
    dry_run: bool,
    current_dir: Option<PathBuf>,
}

impl HookRunner {
    pub fn new(context: HookContext) -> Self {
        Self {
            context,
            dry_run: false,
            current_dir: None,
        }
    }

    /// Preview hook sources instead of running hooks.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run hooks from `dir` rather than the current directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn context(&self) -> &HookContext {
        &self.context
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Ordered list of hooks of `phase` inside `dir`.
    ///
    /// # Errors
    ///
    /// - Return [`HookError::DirectoryMissing`] if `dir` does not exist.
    /// - Return [`HookError::ReadDirectory`] if `dir` cannot be read.
    pub fn plan(&self, dir: &Path, phase: &str) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(HookError::DirectoryMissing { dir: dir.into() });
        }

        let into_error = |source| HookError::ReadDirectory {
            dir: dir.into(),
            source,
        };

        let mut hooks = Vec::new();
        for entry in read_dir(dir).map_err(into_error)? {
            let path = entry.map_err(into_error)?.path();
            let matches = path
                .file_name()
                .and_then(OsStr::to_str)
                .is_some_and(|name| hook_phase(name) == phase);

            if matches && path.is_file() {
                hooks.push(path);
            }
        }

        // INVARIANT: Hooks run in lexicographic order of file name.
        hooks.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(hooks)
    }

    /// Run every hook of `phase` inside `dir`.
    ///
    /// Stops at the first hook that fails. Hooks after it do not run.
    ///
    /// # Errors
    ///
    /// - Return [`HookError::DirectoryMissing`] if `dir` does not exist.
    /// - Return [`HookError::Execution`] if a hook exits unsuccessfully.
    /// - Return [`HookError::Spawn`] if a hook cannot be started.
    /// - Return [`HookError::ReadSource`] if a hook cannot be read in dry run.
    #[instrument(skip(self), level = "debug")]
    pub fn run_phase(&self, dir: &Path, phase: &str) -> Result<Vec<HookReport>> {
        let hooks = self.plan(dir, phase)?;
        debug!("{} hooks in phase {phase:?}", hooks.len());

        let mut reports = Vec::with_capacity(hooks.len());
        for path in hooks {
            let outcome = if self.dry_run {
                let source = read(&path).map_err(|source| HookError::ReadSource {
                    path: path.clone(),
                    source,
                })?;
                HookOutcome::Previewed { source }
            } else {
                HookOutcome::Executed {
                    output: self.execute(&path)?,
                }
            };
            reports.push(HookReport { path, outcome });
        }

        Ok(reports)
    }

    fn execute(&self, path: &Path) -> Result<String> {
        info!("run hook {:?}", path.display());
        let mut command = Command::new(path);
        command.args(self.context.args()).envs(self.context.envs());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let output = command.output().map_err(|source| HookError::Spawn {
            path: path.into(),
            source,
        })?;
        let message = combine_output(&output.stdout, &output.stderr);
        if !message.is_empty() {
            info!("{message}");
        }

        if !output.status.success() {
            return Err(HookError::Execution {
                path: path.into(),
                status: output.status,
                output: message,
            });
        }

        Ok(message)
    }
}

/// Phase of hook with file name `name`.
pub fn hook_phase(name: &str) -> &str {
    name.split_once('.').map_or(name, |(phase, _)| phase)
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(&format!("stdout: {stdout}"));
    }

    if !stderr.is_empty() {
        message.push_str(&format!("stderr: {stderr}"));
    }

    // INVARIANT: Chomp trailing newlines.
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}

/// Hook orchestration error types.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Hook directory does not exist.
    #[error("hook directory {dir:?} does not exist")]
    DirectoryMissing { dir: PathBuf },

    /// Hook directory cannot be read.
    #[error("failed to read hook directory {dir:?}")]
    ReadDirectory {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hook source cannot be read.
    #[error("failed to read hook {path:?}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hook cannot be started.
    #[error("failed to start hook {path:?}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hook exited unsuccessfully.
    #[error("hook {path:?} failed with {status}")]
    Execution {
        path: PathBuf,
        status: ExitStatus,
        output: String,
    },
}

/// Friendly result alias :3
type Result<T, E = HookError> = std::result::Result<T, E>;
