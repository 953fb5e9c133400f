// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote deployment activity log.
//!
//! Activity of the deployment in progress accumulates in an active log on the
//! deploy target. Once the deployment ends, the active log is appended onto an
//! archive log that holds the full history, and removed.
//!
//! Logging is best effort. A failure to write either log is reported locally
//! and never aborts the deployment.

use crate::remote::{quote, RemoteExecutor};

use chrono::Local;
use tracing::{debug, instrument, warn};

/// Log of the deployment in progress.
pub const ACTIVE_LOG: &str = "git-deploy-active.log";

/// History of finished deployments.
pub const ARCHIVE_LOG: &str = "git-deploy.log";

/// Activity log on the deploy target.
#[derive(Debug, Clone)]
pub struct DeployLog<R> {
    remote: R,
    log_dir: String,
    user: String,
}

impl<R: RemoteExecutor> DeployLog<R> {
    /// Construct new log kept in remote `log_dir`, attributed to `user`.
    pub fn new(remote: R, log_dir: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            remote,
            log_dir: log_dir.into(),
            user: user.into(),
        }
    }

    pub fn active_path(&self) -> String {
        format!("{}/{ACTIVE_LOG}", self.log_dir)
    }

    pub fn archive_path(&self) -> String {
        format!("{}/{ARCHIVE_LOG}", self.log_dir)
    }

    /// Format log line for `message`.
    pub fn format_line(&self, message: &str) -> String {
        format!(
            "{} user({}) {message}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.user
        )
    }

    /// Append one line to the active log.
    ///
    /// Returns false if the line could not be written.
    #[instrument(skip(self), level = "debug")]
    pub fn append(&self, message: &str) -> bool {
        let active = quote(&self.active_path()).into_owned();
        let command = format!(
            "mkdir -p {} && touch {active} && printf '%s\\n' {} >> {active}",
            quote(&self.log_dir),
            quote(&self.format_line(message)),
        );

        self.step("append to active log", &command)
    }

    /// Move active log onto the archive log.
    ///
    /// Steps run in order and stop at the first failure, leaving the logs as
    /// the previous step left them. Returns false if any step failed.
    #[instrument(skip(self), level = "debug")]
    pub fn archive(&self) -> bool {
        let active = quote(&self.active_path()).into_owned();
        let archive = quote(&self.archive_path()).into_owned();
        let steps = [
            (
                "create archive log",
                format!("mkdir -p {} && touch {archive}", quote(&self.log_dir)),
            ),
            (
                "append active log to archive",
                format!("if [ -f {active} ]; then cat {active} >> {archive}; fi"),
            ),
            ("remove active log", format!("rm -f {active}")),
        ];

        steps
            .iter()
            .all(|(what, command)| self.step(what, command))
    }

    fn step(&self, what: &str, command: &str) -> bool {
        match self.remote.run_probed(command) {
            Ok(probe) if probe.succeeded => {
                debug!("{what}: done");
                true
            }
            Ok(probe) => {
                warn!("failed to {what}: {}", probe.output.stderr_message());
                false
            }
            Err(error) => {
                warn!("failed to {what}: {error}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::LocalExecutor;
    use pretty_assertions::assert_eq;
    use std::fs::{read_to_string, write};

    fn log_in(dir: &std::path::Path) -> DeployLog<LocalExecutor> {
        DeployLog::new(
            LocalExecutor,
            dir.join("deploy").to_string_lossy(),
            "John Doe",
        )
    }

    #[test]
    fn append_escapes_message() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let log = log_in(dir.path());

        assert!(log.append("STARTING git deploy."));
        assert!(log.append("it's $HOME; `rm -rf /`"));

        let contents = read_to_string(dir.path().join("deploy").join(ACTIVE_LOG))?;
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" user(John Doe) STARTING git deploy."));
        assert!(lines[1].ends_with(" user(John Doe) it's $HOME; `rm -rf /`"));

        Ok(())
    }

    #[test]
    fn archive_moves_active_onto_archive() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let log = log_in(dir.path());
        std::fs::create_dir_all(dir.path().join("deploy"))?;
        write(dir.path().join("deploy").join(ARCHIVE_LOG), "older\n")?;

        assert!(log.append("SYNC successful!"));
        assert!(log.archive());

        let archive = read_to_string(dir.path().join("deploy").join(ARCHIVE_LOG))?;
        assert!(archive.starts_with("older\n"));
        assert!(archive.trim_end().ends_with("SYNC successful!"));
        assert!(!dir.path().join("deploy").join(ACTIVE_LOG).exists());

        // Nothing left to archive.
        assert!(log.archive());

        Ok(())
    }

    #[test]
    fn failed_append_keeps_active_log() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let log = log_in(dir.path());
        assert!(log.append("SYNC failed: hook exited 1"));

        // Archive log path is occupied by a directory, so `cat >>` fails.
        std::fs::create_dir(dir.path().join("deploy").join(ARCHIVE_LOG))?;
        assert!(!log.archive());

        let active = read_to_string(dir.path().join("deploy").join(ACTIVE_LOG))?;
        assert!(active.trim_end().ends_with("SYNC failed: hook exited 1"));

        Ok(())
    }

    #[test]
    fn failures_are_reported_not_raised() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        // Log directory path is occupied by a regular file.
        write(dir.path().join("deploy"), "")?;
        let log = log_in(dir.path());

        assert!(!log.append("STARTING git deploy."));
        assert!(!log.archive());

        Ok(())
    }
}
