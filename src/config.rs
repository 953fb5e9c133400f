// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment configuration.
//!
//! git-deploy does not keep a configuration file of its own. Every setting is
//! read from the git configuration store, i.e., the stacked repository, global,
//! and system git config files, under the `deploy` section. The committer
//! identity comes from the standard `user.name` and `user.email` keys.
//!
//! # Configuration Keys
//!
//! | Key                  | Required | Meaning                                   |
//! |----------------------|----------|-------------------------------------------|
//! | `deploy.tag-prefix`  | yes      | Prefix of every deploy tag                |
//! | `deploy.hook-dir`    | yes      | Hook directory, relative to client path   |
//! | `deploy.path`        | yes      | Repository root on the deploy target      |
//! | `deploy.user`        | yes      | SSH user on the deploy target             |
//! | `deploy.target`      | yes      | Deploy target host                        |
//! | `deploy.remote`      | yes      | Default remote to sync through            |
//! | `deploy.branch`      | yes      | Default branch to sync                    |
//! | `deploy.client-path` | yes      | Root of the client checkout               |
//! | `user.name`          | yes      | Committer and log identity                |
//! | `user.email`         | yes      | Committer email                           |
//! | `deploy.key-path`    | no       | SSH key, defaults to `~/.ssh/id_rsa`      |
//! | `deploy.port`        | no       | SSH port, defaults to 22                  |
//! | `deploy.abort-reset` | no       | Reset to start tag on abort, default true |
//!
//! All required keys are resolved up front. A missing key is reported before
//! any stateful operation runs.

use crate::{
    path::{default_key_path, local_deploy_dir, remote_deploy_dir, HookLayout, NoWayHome},
    vcs::Author,
};

use git2::{Config, ErrorCode, Repository};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};
use tracing::{debug, instrument};

/// Default SSH port of the deploy target.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Typed deployment configuration.
///
/// Constructed once per run and handed to the deployment engine, which
/// derives the settings of every collaborator from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Prefix of every deploy tag, usually the repository name.
    pub repo_name: String,

    /// Hook directory. Relative paths are resolved against `client_path`.
    pub hook_dir: PathBuf,

    /// Repository root on the deploy target.
    pub path: String,

    /// SSH user on the deploy target.
    pub user: String,

    /// Deploy target host.
    pub target: String,

    /// Default remote to sync through.
    pub remote: String,

    /// Default branch to sync.
    pub branch: String,

    /// Root of the client checkout.
    pub client_path: PathBuf,

    /// SSH private key used to reach the deploy target.
    pub key_path: PathBuf,

    /// SSH port of the deploy target.
    pub port: u16,

    /// Reset the client repository to the start tag on abort.
    pub abort_reset: bool,

    /// Top-level directory of the client repository.
    pub top_dir: PathBuf,

    /// Committer identity.
    pub author: Author,
}

impl DeployConfig {
    /// Load configuration for an opened client repository.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoTopLevel`] if repository is bare.
    /// - Return [`ConfigError::MissingKey`] if a required key is not set.
    /// - Return [`ConfigError::Git2`] if git config cannot be read.
    #[instrument(skip(repository), level = "debug")]
    pub fn load(repository: &Repository) -> Result<Self> {
        let top_dir = repository
            .workdir()
            .ok_or(ConfigError::NoTopLevel)?
            .to_path_buf();
        debug!("load deploy configuration for {:?}", top_dir.display());
        let config = repository.config()?.snapshot()?;

        Self::from_git_config(&config, top_dir)
    }

    /// Resolve configuration from a git config store.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingKey`] if a required key is not set.
    /// - Return [`ConfigError::InvalidPort`] if `deploy.port` is out of range.
    /// - Return [`ConfigError::ShellExpansion`] if `deploy.key-path` cannot be
    ///   expanded.
    /// - Return [`ConfigError::NoWayHome`] if default key path cannot be
    ///   determined.
    pub fn from_git_config(config: &Config, top_dir: impl Into<PathBuf>) -> Result<Self> {
        let key_path = match optional_string(config, "deploy.key-path")? {
            // INVARIANT: Perform shell expansion on key path.
            Some(path) => PathBuf::from(shellexpand::full(path.as_str())?.into_owned()),
            None => default_key_path()?,
        };

        let port = match optional(config.get_i32("deploy.port"))? {
            Some(port) => u16::try_from(port).map_err(|_| ConfigError::InvalidPort(port))?,
            None => DEFAULT_SSH_PORT,
        };

        Ok(Self {
            repo_name: required(config, ConfigKey::TagPrefix)?,
            hook_dir: required(config, ConfigKey::HookDir)?.into(),
            path: required(config, ConfigKey::Path)?,
            user: required(config, ConfigKey::User)?,
            target: required(config, ConfigKey::Target)?,
            remote: required(config, ConfigKey::Remote)?,
            branch: required(config, ConfigKey::Branch)?,
            client_path: required(config, ConfigKey::ClientPath)?.into(),
            key_path,
            port,
            abort_reset: optional(config.get_bool("deploy.abort-reset"))?.unwrap_or(true),
            top_dir: top_dir.into(),
            author: Author::new(
                required(config, ConfigKey::UserName)?,
                required(config, ConfigKey::UserEmail)?,
            ),
        })
    }

    /// Hook directory layout on the client.
    pub fn hook_layout(&self) -> HookLayout {
        HookLayout::new(self.client_path.join(&self.hook_dir))
    }

    /// Deployment directory on the client.
    pub fn local_deploy_dir(&self) -> PathBuf {
        local_deploy_dir(&self.top_dir)
    }

    /// Deployment directory on the deploy target.
    pub fn remote_deploy_dir(&self) -> String {
        remote_deploy_dir(&self.path)
    }
}

/// Required configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    TagPrefix,
    HookDir,
    Path,
    User,
    Target,
    Remote,
    Branch,
    ClientPath,
    UserName,
    UserEmail,
}

impl ConfigKey {
    /// Full git config name of the key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TagPrefix => "deploy.tag-prefix",
            Self::HookDir => "deploy.hook-dir",
            Self::Path => "deploy.path",
            Self::User => "deploy.user",
            Self::Target => "deploy.target",
            Self::Remote => "deploy.remote",
            Self::Branch => "deploy.branch",
            Self::ClientPath => "deploy.client-path",
            Self::UserName => "user.name",
            Self::UserEmail => "user.email",
        }
    }
}

impl Display for ConfigKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

fn required(config: &Config, key: ConfigKey) -> Result<String> {
    optional_string(config, key.name())?.ok_or(ConfigError::MissingKey(key))
}

fn optional_string(config: &Config, name: &str) -> Result<Option<String>> {
    optional(config.get_string(name))
}

fn optional<T>(value: std::result::Result<T, git2::Error>) -> Result<Option<T>> {
    match value {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.code() == ErrorCode::NotFound => Ok(None),
        Err(error) => Err(ConfigError::Git2(error)),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required key is not set.
    #[error("missing configuration item {0}, set it with: git config {0} <value>")]
    MissingKey(ConfigKey),

    /// Client repository has no working tree.
    #[error("cannot find top level directory for the git repository")]
    NoTopLevel,

    /// Client repository cannot be found from the current directory.
    #[error("cannot open client repository")]
    OpenRepository(#[source] git2::Error),

    /// SSH port does not fit a port number.
    #[error("invalid ssh port {0} in deploy.port")]
    InvalidPort(i32),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Default key path cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),

    /// Git config cannot be read.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
