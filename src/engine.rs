// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment state machine.
//!
//! [`DeployEngine`] drives a deployment from start to finish. It owns every
//! collaborator a deployment needs: the client repository, the deploy
//! target, the lock and activity log on that target, and the local state
//! file. Everything a subcommand of the command line does maps onto one
//! method of the engine.
//!
//! # Preconditions
//!
//! - `start` requires that no lock of any user exists on the target.
//! - `sync` and `revert` require that our own lock exists on the target.
//! - Everything else can run at any time.
//!
//! A failing sync hook leaves the lock in place, so nobody else can deploy
//! on top of a half-finished rollout. Use `abort` to give up on it.

mod strategy;
mod tag;

pub use strategy::{custom_chain, release_chain, PhaseStep, SyncStrategy};
pub use tag::{DeployTag, TagPhase, TAG_MESSAGE};

use crate::{
    config::{ConfigError, DeployConfig},
    deploy_log::DeployLog,
    error::DeployError,
    hook::{HookContext, HookError, HookReport, HookRunner},
    lock::{DeployLock, LockError},
    path::is_env_name,
    remote::{quote, RemoteExecutor, SshExecutor, SshTarget},
    state::{DeployState, StateFile, STATE_FILE},
    vcs::{CommitId, Git2Vcs, VcsError, VersionControl},
};

use git2::Repository;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Options of a sync.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Remote to sync through, configured default if not set.
    pub remote: Option<String>,

    /// Branch to sync, configured default if not set.
    pub branch: Option<String>,

    /// Passed on to hooks.
    pub force: bool,

    /// Environment whose hooks run.
    pub env: Option<String>,

    /// Show hook sources instead of running anything.
    pub dry_run: bool,

    /// Push and pull instead of running hooks.
    pub default: bool,

    /// Only run pre-sync hooks, leave the deployment open for `finish`.
    pub release: bool,
}

/// Result of a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Sync tag created, not set for dry runs.
    pub tag: Option<String>,
    pub strategy: SyncStrategy,
    pub hooks: Vec<HookReport>,
}

/// Options of a revert.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RevertOptions {
    /// Deploy tag to roll back to, second most recent if not set.
    pub tag: Option<String>,

    /// Sync right after the rollback commit.
    pub auto_sync: bool,

    /// Options of the chained sync.
    pub sync: SyncOptions,
}

/// Result of a revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertReport {
    /// Deploy tag rolled back to.
    pub target: String,

    /// Number of commits reverted.
    pub reverted: usize,

    /// Rollback commit.
    pub commit: CommitId,

    /// Chained sync, if any.
    pub sync: Option<SyncReport>,
}

/// Deployment state machine.
pub struct DeployEngine<V = Git2Vcs, R = SshExecutor> {
    config: DeployConfig,
    vcs: V,
    remote: R,
    lock: DeployLock<R>,
    deploy_log: DeployLog<R>,
    state: StateFile,
}

impl DeployEngine {
    /// Open engine for client repository containing `path`.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Config`] if no client repository is found, or
    ///   configuration is incomplete.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repository = Repository::discover(path.as_ref()).map_err(ConfigError::OpenRepository)?;
        let config = DeployConfig::load(&repository)?;
        let remote = SshExecutor::new(SshTarget::from_config(&config));

        Ok(Self::new(config, Git2Vcs::new(repository), remote))
    }
}

impl<V, R> DeployEngine<V, R>
where
    V: VersionControl,
    R: RemoteExecutor + Clone,
{
    pub fn new(config: DeployConfig, vcs: V, remote: R) -> Self {
        let deploy_dir = config.remote_deploy_dir();
        let lock = DeployLock::new(remote.clone(), deploy_dir.as_str(), config.user.as_str());
        let deploy_log = DeployLog::new(
            remote.clone(),
            deploy_dir.as_str(),
            config.author.name.as_str(),
        );
        let state = StateFile::new(config.local_deploy_dir());

        Self {
            config,
            vcs,
            remote,
            lock,
            deploy_log,
            state,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn lock(&self) -> &DeployLock<R> {
        &self.lock
    }

    pub fn deploy_log(&self) -> &DeployLog<R> {
        &self.deploy_log
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    /// Start deployment.
    ///
    /// Takes the lock, tags HEAD with a start tag, and records it. Tagging
    /// is best effort, e.g., a repository without commits starts untagged.
    /// Returns the start tag, if any.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::AlreadyStarted`] if any lock exists on target.
    /// - Return [`DeployError::Lock`] if lock cannot be checked or taken.
    /// - Return [`DeployError::State`] if start tag cannot be recorded.
    #[instrument(skip(self), level = "debug")]
    pub fn start(&self) -> Result<Option<String>> {
        if let Some(holder) = self.lock.holders()?.into_iter().next() {
            return Err(DeployError::AlreadyStarted { holder });
        }

        match self.lock.acquire() {
            Err(LockError::Contended { name }) => {
                return Err(DeployError::AlreadyStarted { holder: name })
            }
            result => result?,
        }

        let tag = DeployTag::now(&self.config.repo_name, TagPhase::Start).to_string();
        let tag = match self.vcs.tag(&tag, &self.config.author, TAG_MESSAGE) {
            Ok(()) => {
                self.state.write(&DeployState {
                    repo: self.config.repo_name.clone(),
                    tag: tag.clone(),
                })?;
                Some(tag)
            }
            Err(error) => {
                warn!("start untagged: {error}");
                self.state.clear()?;
                None
            }
        };

        self.deploy_log.append("STARTING git deploy.");
        info!("deployment started");

        Ok(tag)
    }

    /// Abort deployment.
    ///
    /// Archives the activity log, resets the client repository to the
    /// recorded start tag if `deploy.abort-reset` allows it, and drops our
    /// lock. Safe to run when no deployment is in progress.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Lock`] if lock cannot be checked or released.
    /// - Return [`DeployError::Vcs`] if reset fails. A start tag that no
    ///   longer exists is skipped.
    /// - Return [`DeployError::State`] if state file cannot be handled.
    #[instrument(skip(self), level = "debug")]
    pub fn abort(&self) -> Result<()> {
        self.deploy_log.append("ABORTING git deploy.");
        self.deploy_log.archive();

        let held = self.lock.check()?;
        if held && self.config.abort_reset {
            if let Some(state) = self.state.read()? {
                info!("reset to start tag {:?}", state.tag);
                match self.vcs.reset_head_to_tag(Some(&state.tag)) {
                    Err(VcsError::TagNotFound { tag }) => {
                        warn!("start tag {tag:?} is gone, keeping HEAD");
                    }
                    result => result?,
                }
            }
        }
        self.state.clear()?;

        if held {
            self.lock.release()?;
        } else {
            warn!("no deploy lock of {} held", self.config.user);
        }
        info!("deployment aborted");

        Ok(())
    }

    /// Finish deployment left open by a release sync.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Lock`] if lock cannot be checked or released.
    /// - Return [`DeployError::State`] if state file cannot be cleared.
    #[instrument(skip(self), level = "debug")]
    pub fn finish(&self) -> Result<()> {
        self.deploy_log.append("FINISHED git deploy.");
        self.deploy_log.archive();

        if self.lock.check()? {
            self.lock.release()?;
        } else {
            warn!("no deploy lock of {} held", self.config.user);
        }
        self.state.clear()?;
        info!("deployment finished");

        Ok(())
    }

    /// Sync release to deploy target.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::NotStarted`] if our lock is not held.
    /// - Return [`DeployError::InvalidEnv`] if environment name is not a
    ///   single directory name.
    /// - Return [`DeployError::Sync`] if a hook fails. Lock stays held.
    /// - Return [`DeployError::Rollout`] if target fails to pull. Lock stays
    ///   held.
    /// - Return [`DeployError::Vcs`] if sync tag cannot be created, or push
    ///   fails.
    #[instrument(skip(self), level = "debug")]
    pub fn sync(&self, options: &SyncOptions) -> Result<SyncReport> {
        self.ensure_started()?;
        check_env(options)?;
        self.sync_locked(options)
    }

    /// Roll client repository back to an earlier deploy tag.
    ///
    /// Every commit newer than the target is reverted, and the result is
    /// committed as one rollback commit. On failure, partial reverts are
    /// discarded.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::NotStarted`] if our lock is not held.
    /// - Return [`DeployError::InsufficientTags`] if no tag is given and fewer
    ///   than two deploy tags exist.
    /// - Return [`DeployError::RevertTargetNotFound`] if target commit is not
    ///   in the history of HEAD.
    /// - Return [`DeployError::Vcs`] if client working tree has uncommitted
    ///   changes, or reverting or committing fails.
    #[instrument(skip(self), level = "debug")]
    pub fn revert(&self, options: &RevertOptions) -> Result<RevertReport> {
        self.ensure_started()?;
        if options.auto_sync {
            check_env(&options.sync)?;
        }

        let target = match &options.tag {
            Some(tag) => tag.clone(),
            None => self.previous_deploy_tag()?,
        };
        let target_commit = self.vcs.resolve_tag_commit(&target)?;
        self.vcs.ensure_clean()?;

        let reverted = match self.revert_until(&target_commit) {
            Ok(Some(reverted)) => reverted,
            Ok(None) => {
                self.discard_partial_revert();
                return Err(DeployError::RevertTargetNotFound { tag: target });
            }
            Err(error) => {
                self.discard_partial_revert();
                return Err(error);
            }
        };
        debug!("reverted {reverted} commits");

        let commit = match self
            .vcs
            .commit(&self.config.author, &format!("Rollback to {target}."))
        {
            Ok(commit) => commit,
            Err(error) => {
                self.discard_partial_revert();
                return Err(error.into());
            }
        };
        self.deploy_log.append(&format!("REVERT -> {target}"));

        let tag = DeployTag::now(&self.config.repo_name, TagPhase::Revert).to_string();
        if let Err(error) = self.vcs.tag(&tag, &self.config.author, TAG_MESSAGE) {
            warn!("revert untagged: {error}");
        }

        let sync = if options.auto_sync {
            Some(self.sync_locked(&options.sync)?)
        } else {
            None
        };

        Ok(RevertReport {
            target,
            reverted,
            commit,
            sync,
        })
    }

    /// Most recent deploy tag.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::NoDeploysFound`] if no deploy tag exists.
    pub fn show_latest_tag(&self) -> Result<String> {
        self.vcs
            .list_deploy_tags(&self.config.repo_name)?
            .pop()
            .ok_or(DeployError::NoDeploysFound)
    }

    /// Up to `count` most recent deploy tags, newest first.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::InvalidCount`] if `count` is not positive.
    pub fn log_deploys(&self, count: i64) -> Result<Vec<String>> {
        let count = usize::try_from(count)
            .ok()
            .filter(|count| *count > 0)
            .ok_or(DeployError::InvalidCount(count))?;

        let tags = self.vcs.list_deploy_tags(&self.config.repo_name)?;
        Ok(tags.into_iter().rev().take(count).collect())
    }

    /// Patch from the previous deploy to the latest one.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::InsufficientTags`] if fewer than two deploy
    ///   tags exist.
    /// - Return [`DeployError::Vcs`] if diff cannot be computed.
    pub fn diff(&self) -> Result<String> {
        let tags = self.vcs.list_deploy_tags(&self.config.repo_name)?;
        let [.., previous, latest] = tags.as_slice() else {
            return Err(DeployError::InsufficientTags { found: tags.len() });
        };

        let from = self.vcs.resolve_tag_commit(previous)?;
        let to = self.vcs.resolve_tag_commit(latest)?;
        debug!("diff {previous} -> {latest}");

        Ok(self.vcs.diff(&from, &to)?)
    }

    fn ensure_started(&self) -> Result<()> {
        if !self.lock.check()? {
            return Err(DeployError::NotStarted);
        }

        Ok(())
    }

    fn previous_deploy_tag(&self) -> Result<String> {
        let tags = self.vcs.list_deploy_tags(&self.config.repo_name)?;
        match tags.as_slice() {
            [.., previous, _] => Ok(previous.clone()),
            _ => Err(DeployError::InsufficientTags { found: tags.len() }),
        }
    }

    /// Revert commits newest first until `target` is reached.
    ///
    /// Returns number of commits reverted, or nothing if history ran out
    /// before reaching `target`.
    fn revert_until(&self, target: &CommitId) -> Result<Option<usize>> {
        let mut reverted = 0;
        for commit in self.vcs.commit_history()? {
            let commit = commit?;
            if commit == *target {
                return Ok(Some(reverted));
            }

            self.vcs.revert_no_commit(&commit)?;
            reverted += 1;
        }

        Ok(None)
    }

    fn discard_partial_revert(&self) {
        if let Err(error) = self.vcs.reset_head_to_tag(None) {
            warn!("failed to discard partial revert: {error}");
        }
    }

    fn sync_locked(&self, options: &SyncOptions) -> Result<SyncReport> {
        let strategy = SyncStrategy::resolve(options);
        let remote = options
            .remote
            .clone()
            .unwrap_or_else(|| self.config.remote.clone());
        let branch = options
            .branch
            .clone()
            .unwrap_or_else(|| self.config.branch.clone());
        let layout = self.config.hook_layout();
        let env = options.env.as_deref();
        let mut context = HookContext {
            repo: self.config.repo_name.clone(),
            tag: None,
            remote: remote.clone(),
            branch: branch.clone(),
            env: options.env.clone(),
            force: options.force,
        };

        if strategy == SyncStrategy::DryRun {
            let runner = HookRunner::new(context).dry_run(true);
            let hooks = self.run_chain(&runner, custom_chain(&layout, env))?;
            return Ok(SyncReport {
                tag: None,
                strategy,
                hooks,
            });
        }

        let tag = DeployTag::now(&self.config.repo_name, TagPhase::Sync).to_string();
        self.vcs.tag(&tag, &self.config.author, TAG_MESSAGE)?;
        self.deploy_log
            .append(&format!("SYNC {tag} to {remote}/{branch} ({strategy:?})"));
        context.tag = Some(tag.clone());
        let runner = HookRunner::new(context).current_dir(&self.config.top_dir);

        let result = match strategy {
            SyncStrategy::Default => self.rollout(&remote, &branch, &tag).map(|()| Vec::new()),
            SyncStrategy::Release => self.run_chain(&runner, release_chain(&layout, env)),
            SyncStrategy::Custom | SyncStrategy::DryRun => {
                self.run_chain(&runner, custom_chain(&layout, env))
            }
        };
        let hooks = match result {
            Ok(hooks) => hooks,
            Err(error) => {
                self.deploy_log.append(&format!("SYNC failed: {error}"));
                return Err(error);
            }
        };

        let report = SyncReport {
            tag: Some(tag.clone()),
            strategy,
            hooks,
        };

        if strategy == SyncStrategy::Release {
            self.deploy_log.append("RELEASE staged, waiting for finish.");
            info!("release staged, run git deploy finish when done");
            return Ok(report);
        }

        self.state.write(&DeployState {
            repo: self.config.repo_name.clone(),
            tag,
        })?;
        let remote_state = format!("{}/{STATE_FILE}", self.config.remote_deploy_dir());
        self.remote.copy_file(self.state.path(), &remote_state)?;

        self.deploy_log.append("SYNC successful!");
        self.deploy_log.archive();
        self.lock.release()?;
        info!("sync successful");

        Ok(report)
    }

    fn run_chain(&self, runner: &HookRunner, steps: Vec<PhaseStep>) -> Result<Vec<HookReport>> {
        let mut reports = Vec::new();
        for step in steps {
            match runner.run_phase(&step.dir, &step.phase) {
                Ok(found) => reports.extend(found),
                Err(HookError::DirectoryMissing { dir }) if !step.required => {
                    debug!("skip missing hook directory {:?}", dir.display());
                }
                Err(error) => return Err(DeployError::Sync(error)),
            }
        }

        Ok(reports)
    }

    fn rollout(&self, remote: &str, branch: &str, tag: &str) -> Result<()> {
        self.vcs.push(remote, branch, &[tag.to_string()])?;

        let command = format!(
            "cd {} && git pull {} {}",
            quote(&self.config.path),
            quote(remote),
            quote(branch)
        );
        let probe = self.remote.run_probed(&command)?;
        if !probe.succeeded {
            return Err(DeployError::Rollout {
                stderr: probe.output.stderr_message(),
            });
        }
        info!("deploy target pulled {remote}/{branch}");

        Ok(())
    }
}

fn check_env(options: &SyncOptions) -> Result<()> {
    match options.env.as_deref() {
        Some(env) if !is_env_name(env) => Err(DeployError::InvalidEnv { env: env.into() }),
        _ => Ok(()),
    }
}

/// Friendly result alias :3
type Result<T, E = DeployError> = std::result::Result<T, E>;
