// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment error taxonomy.
//!
//! Every failure a deployment can run into ends up as a [`DeployError`].
//! Each failure reason maps to a stable process exit code through
//! [`DeployError::exit_code`], so scripts driving git-deploy can tell reasons
//! apart without parsing messages.
//!
//! # Exit Codes
//!
//! | Code  | Reason                                       |
//! |-------|----------------------------------------------|
//! | 1     | Unclassified failure                         |
//! | 2     | Deployment already started                   |
//! | 3     | Invalid command line usage                   |
//! | 5     | Hard reset failed                            |
//! | 6     | Diff failed                                  |
//! | 7     | Deploy tags cannot be listed                 |
//! | 8     | Tag not found                                |
//! | 9     | Lock on deploy target cannot be checked      |
//! | 10    | Invalid log count                            |
//! | 11    | No deploys found                             |
//! | 12    | Tag cannot be created                        |
//! | 14    | Commit failed or does not match HEAD         |
//! | 19-29 | Missing configuration key, one per key       |
//! | 30    | Deployment not started                       |
//! | 32    | State file cannot be written                 |
//! | 33    | Revert failed or working tree is dirty       |
//! | 34    | Commit history cannot be walked              |
//! | 35    | Revert target not found in history           |
//! | 36    | Fewer than two deploy tags                   |
//! | 37    | SSH settings are invalid                     |
//! | 40    | Hook failed                                  |
//! | 41    | Hook directory missing                       |
//! | 42    | Hook cannot be started or read               |
//! | 43    | Deploy target failed to pull                 |
//! | 44    | Push failed                                  |
//! | 45    | Deploy target cannot be reached              |
//! | 46    | File transfer to deploy target failed        |
//! | 47    | Lock cannot be acquired or released          |
//! | 48    | Invalid environment name                     |
//! | 50    | State file cannot be read                    |

use crate::{
    config::{ConfigError, ConfigKey},
    hook::HookError,
    lock::LockError,
    remote::RemoteError,
    state::StateError,
    vcs::VcsError,
};

/// Process exit code for invalid command line usage.
pub const USAGE_EXIT_CODE: i32 = 3;

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A deployment is already in progress.
    #[error("deployment already started, lock {holder:?} is held on target")]
    AlreadyStarted { holder: String },

    /// No deployment of ours is in progress.
    #[error("deployment not started, run git deploy start first")]
    NotStarted,

    /// Too few deploy tags for the operation.
    #[error("need at least two deploy tags, found {found}")]
    InsufficientTags { found: usize },

    /// No deploy tags exist.
    #[error("no deploys found")]
    NoDeploysFound,

    /// Log count is not positive.
    #[error("invalid log count {0}, must be greater than zero")]
    InvalidCount(i64),

    /// Commit history does not contain revert target.
    #[error("revert target {tag:?} not found in commit history")]
    RevertTargetNotFound { tag: String },

    /// Sync hook chain failed.
    #[error("sync failed")]
    Sync(#[source] HookError),

    /// Environment name does not name a single hook directory.
    #[error("invalid environment name {env:?}")]
    InvalidEnv { env: String },

    /// Deploy target failed to pull release.
    #[error("deploy target failed to pull release: {stderr}")]
    Rollout { stderr: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl DeployError {
    /// Process exit code of this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AlreadyStarted { .. } => 2,
            Self::NotStarted => 30,
            Self::InsufficientTags { .. } => 36,
            Self::NoDeploysFound => 11,
            Self::InvalidCount(_) => 10,
            Self::RevertTargetNotFound { .. } => 35,
            Self::Sync(error) => hook_exit_code(error),
            Self::Rollout { .. } => 43,
            Self::InvalidEnv { .. } => 48,
            Self::Config(error) => config_exit_code(error),
            Self::Remote(error) => remote_exit_code(error),
            Self::Lock(error) => lock_exit_code(error),
            Self::Vcs(error) => vcs_exit_code(error),
            Self::State(error) => state_exit_code(error),
        }
    }
}

fn config_exit_code(error: &ConfigError) -> i32 {
    match error {
        ConfigError::MissingKey(key) => match key {
            ConfigKey::ClientPath => 19,
            ConfigKey::HookDir => 21,
            ConfigKey::TagPrefix => 22,
            ConfigKey::Path => 23,
            ConfigKey::User => 24,
            ConfigKey::Target => 25,
            ConfigKey::Remote => 26,
            ConfigKey::Branch => 27,
            ConfigKey::UserName => 28,
            ConfigKey::UserEmail => 29,
        },
        ConfigError::NoTopLevel | ConfigError::OpenRepository(_) => 20,
        ConfigError::InvalidPort(_)
        | ConfigError::ShellExpansion(_)
        | ConfigError::NoWayHome(_) => 37,
        ConfigError::Git2(_) => 1,
    }
}

fn remote_exit_code(error: &RemoteError) -> i32 {
    match error {
        RemoteError::Spawn { .. } | RemoteError::Connection { .. } => 45,
        RemoteError::Transfer { .. } => 46,
    }
}

fn lock_exit_code(error: &LockError) -> i32 {
    match error {
        LockError::Check(_) | LockError::Listing { .. } => 9,
        LockError::Contended { .. } => 2,
        LockError::Acquire { .. } | LockError::Release { .. } => 47,
        LockError::Remote(error) => remote_exit_code(error),
    }
}

fn vcs_exit_code(error: &VcsError) -> i32 {
    match error {
        VcsError::TagCreation { .. } => 12,
        VcsError::TagListing(_) => 7,
        VcsError::TagNotFound { .. } => 8,
        VcsError::History(_) => 34,
        VcsError::Revert { .. } | VcsError::DirtyWorktree { .. } => 33,
        VcsError::Commit(_) | VcsError::CommitMismatch { .. } => 14,
        VcsError::Reset(_) => 5,
        VcsError::Diff(_) => 6,
        VcsError::Push { .. } => 44,
        VcsError::Git2(_) => 1,
    }
}

fn state_exit_code(error: &StateError) -> i32 {
    match error {
        StateError::Read { .. } | StateError::Parse { .. } => 50,
        StateError::Serialize(_) | StateError::Write { .. } => 32,
    }
}

fn hook_exit_code(error: &HookError) -> i32 {
    match error {
        HookError::Execution { .. } => 40,
        HookError::DirectoryMissing { .. } => 41,
        HookError::Spawn { .. } | HookError::ReadSource { .. } | HookError::ReadDirectory { .. } => {
            42
        }
    }
}
