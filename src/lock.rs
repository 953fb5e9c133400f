// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Advisory deployment lock.
//!
//! The lock is a zero-byte marker file named `<handle>-<user>` in the deploy
//! directory of the target. Its existence means a deployment is in progress.
//! There is no expiry. A marker left behind by a crashed run stays until
//! someone aborts.

use crate::remote::{quote, RemoteError, RemoteExecutor};

use tracing::{info, instrument, warn};

/// Handle every lock marker name starts with.
pub const LOCK_HANDLE: &str = "lock";

/// Lock marker on the deploy target.
#[derive(Debug, Clone)]
pub struct DeployLock<R> {
    remote: R,
    deploy_dir: String,
    user: String,
    handle: String,
}

impl<R: RemoteExecutor> DeployLock<R> {
    /// Construct new lock for `user` inside remote `deploy_dir`.
    pub fn new(remote: R, deploy_dir: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            remote,
            deploy_dir: deploy_dir.into(),
            user: user.into(),
            handle: LOCK_HANDLE.into(),
        }
    }

    /// File name of lock marker.
    pub fn lock_name(&self) -> String {
        format!("{}-{}", self.handle, self.user)
    }

    /// Full remote path to lock marker.
    pub fn lock_path(&self) -> String {
        format!("{}/{}", self.deploy_dir, self.lock_name())
    }

    /// Check if lock marker of this user exists.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Check`] if deploy target cannot be reached.
    /// - Return [`LockError::Listing`] if deploy directory cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn check(&self) -> Result<bool> {
        let name = self.lock_name();
        Ok(self.list()?.iter().any(|entry| *entry == name))
    }

    /// List every lock marker in the deploy directory, whatever its user.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Check`] if deploy target cannot be reached.
    /// - Return [`LockError::Listing`] if deploy directory cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn holders(&self) -> Result<Vec<String>> {
        let prefix = format!("{}-", self.handle);
        Ok(self
            .list()?
            .into_iter()
            .filter(|entry| entry.starts_with(&prefix))
            .collect())
    }

    /// Create lock marker.
    ///
    /// Marker is created with an exclusive create, so a marker that appears
    /// between checking and acquiring is never clobbered.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Contended`] if marker already exists.
    /// - Return [`LockError::Acquire`] if marker cannot be created.
    /// - Return [`LockError::Remote`] if deploy target cannot be reached.
    #[instrument(skip(self), level = "debug")]
    pub fn acquire(&self) -> Result<()> {
        let command = format!(
            "mkdir -p {} && set -C && : > {}",
            quote(&self.deploy_dir),
            quote(&self.lock_path())
        );
        let probe = self.remote.run_probed(&command)?;

        if !probe.succeeded {
            // INVARIANT: Tell contention apart from other failures.
            if self.check()? {
                return Err(LockError::Contended {
                    name: self.lock_name(),
                });
            }

            return Err(LockError::Acquire {
                name: self.lock_name(),
                stderr: probe.output.stderr_message(),
            });
        }
        info!("acquired lock {:?}", self.lock_path());

        Ok(())
    }

    /// Remove lock marker.
    ///
    /// Removing a marker that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Release`] if marker cannot be removed.
    /// - Return [`LockError::Remote`] if deploy target cannot be reached.
    #[instrument(skip(self), level = "debug")]
    pub fn release(&self) -> Result<()> {
        let probe = self
            .remote
            .run_probed(&format!("rm -f {}", quote(&self.lock_path())))?;

        if !probe.succeeded {
            return Err(LockError::Release {
                name: self.lock_name(),
                stderr: probe.output.stderr_message(),
            });
        }
        info!("released lock {:?}", self.lock_path());

        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let dir = quote(&self.deploy_dir);
        let probe = self
            .remote
            .run_probed(&format!("if [ -d {dir} ]; then ls -1a {dir}; fi"))
            .map_err(LockError::Check)?;

        // INVARIANT: Fail closed when the listing cannot be trusted.
        if !probe.succeeded {
            warn!("cannot list {:?}", self.deploy_dir);
            return Err(LockError::Listing {
                stderr: probe.output.stderr_message(),
            });
        }

        Ok(probe.output.stdout)
    }
}

/// Deployment lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Deploy target cannot be reached while checking lock.
    #[error("failed to check deploy lock")]
    Check(#[source] RemoteError),

    /// Deploy directory cannot be listed.
    #[error("failed to list deploy directory: {stderr}")]
    Listing { stderr: String },

    /// Lock marker already exists.
    #[error("deploy lock {name:?} is already held")]
    Contended { name: String },

    /// Lock marker cannot be created.
    #[error("failed to acquire deploy lock {name:?}: {stderr}")]
    Acquire { name: String, stderr: String },

    /// Lock marker cannot be removed.
    #[error("failed to release deploy lock {name:?}: {stderr}")]
    Release { name: String, stderr: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Friendly result alias :3
type Result<T, E = LockError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::LocalExecutor;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn lock_in(dir: &Path, user: &str) -> DeployLock<LocalExecutor> {
        let deploy_dir = dir.join(".git/deploy");
        DeployLock::new(LocalExecutor, deploy_dir.to_string_lossy(), user)
    }

    #[test]
    fn acquire_check_release() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let lock = lock_in(dir.path(), "deployer");

        assert!(!lock.check()?);
        lock.acquire()?;
        assert!(lock.check()?);
        assert!(dir.path().join(".git/deploy/lock-deployer").is_file());

        lock.release()?;
        assert!(!lock.check()?);
        lock.release()?;

        Ok(())
    }

    #[test]
    fn second_acquire_is_contended() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let lock = lock_in(dir.path(), "deployer");

        lock.acquire()?;
        let result = lock.acquire();
        assert!(matches!(result, Err(LockError::Contended { name }) if name == "lock-deployer"));

        Ok(())
    }

    #[test]
    fn holders_include_other_users() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ours = lock_in(dir.path(), "deployer");
        let theirs = lock_in(dir.path(), "hotfixer");

        assert_eq!(ours.holders()?, Vec::<String>::new());
        theirs.acquire()?;
        std::fs::write(dir.path().join(".git/deploy/.deploy"), "{}")?;

        assert!(!ours.check()?);
        assert_eq!(ours.holders()?, vec!["lock-hotfixer".to_string()]);

        Ok(())
    }

    #[test]
    fn unlistable_directory_fails_closed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        // Deploy directory path is occupied by a regular file.
        std::fs::create_dir_all(dir.path().join(".git"))?;
        std::fs::write(dir.path().join(".git/deploy"), "")?;
        let lock = lock_in(dir.path(), "deployer");

        assert!(!lock.check()?);
        assert!(matches!(lock.acquire(), Err(LockError::Acquire { .. })));

        Ok(())
    }
}
