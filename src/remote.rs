// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote command execution.
//!
//! Everything git-deploy does on the deploy target goes through a
//! [`RemoteExecutor`]: running shell commands and copying files. The default
//! implementation, [`SshExecutor`], shells out to the system `ssh` and `scp`
//! binaries, opening a fresh session for every call.
//!
//! Commands are handed to the remote login shell as a single string. Callers
//! are expected to escape every argument they interpolate with [`quote`].

use crate::config::DeployConfig;

use shell_escape::unix::escape;
use std::{
    borrow::Cow,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

/// Marker echoed after a command that exited successfully.
const PROBE_SENTINEL: &str = "__git_deploy_ok__";

/// Exit status `ssh` reserves for its own failures.
const SSH_FAILURE_STATUS: i32 = 255;

/// Captured output of a remote command, split into lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl RemoteOutput {
    /// Split raw process output into lines, dropping trailing whitespace.
    pub fn from_bytes(stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            stdout: split_lines(stdout),
            stderr: split_lines(stderr),
        }
    }

    /// Standard error joined into one message.
    pub fn stderr_message(&self) -> String {
        self.stderr.join("\n")
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|line| line.trim_end().to_string())
        .collect()
}

/// Output of a remote command along with whether it succeeded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbedOutput {
    pub output: RemoteOutput,
    pub succeeded: bool,
}

/// Run commands and copy files on the deploy target.
pub trait RemoteExecutor {
    /// Run shell command on the deploy target.
    ///
    /// The exit status of the command itself is not checked. Use
    /// [`RemoteExecutor::run_probed`] when the outcome matters.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Spawn`] if the transport cannot be started.
    /// - Return [`RemoteError::Connection`] if the target cannot be reached.
    fn run(&self, command: &str) -> Result<RemoteOutput>;

    /// Copy local file to the deploy target, preserving permission bits.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Spawn`] if the transport cannot be started.
    /// - Return [`RemoteError::Transfer`] if the copy fails.
    fn copy_file(&self, local: &Path, remote: &str) -> Result<()>;

    /// Run shell command and report whether it exited successfully.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError`] under the same conditions as
    ///   [`RemoteExecutor::run`].
    fn run_probed(&self, command: &str) -> Result<ProbedOutput> {
        let mut output = self.run(&format!("( {command} ) && echo {PROBE_SENTINEL}"))?;
        let before = output.stdout.len();
        output.stdout.retain(|line| line != PROBE_SENTINEL);
        let succeeded = output.stdout.len() != before;

        Ok(ProbedOutput { output, succeeded })
    }
}

/// Connection settings of the deploy target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub key_path: PathBuf,
    pub port: u16,
}

impl SshTarget {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            host: config.target.clone(),
            user: config.user.clone(),
            key_path: config.key_path.clone(),
            port: config.port,
        }
    }
}

/// Remote execution through system `ssh` and `scp` binaries.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    target: SshTarget,
    ssh_bin: String,
    scp_bin: String,
}

impl SshExecutor {
    pub fn new(target: SshTarget) -> Self {
        Self {
            target,
            ssh_bin: "ssh".into(),
            scp_bin: "scp".into(),
        }
    }

    /// Use different `ssh` and `scp` binaries.
    pub fn with_binaries(mut self, ssh_bin: impl Into<String>, scp_bin: impl Into<String>) -> Self {
        self.ssh_bin = ssh_bin.into();
        self.scp_bin = scp_bin.into();
        self
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn ssh_args(&self, command: &str) -> Vec<OsString> {
        let mut args = self.common_args("-p");
        args.extend([
            "-l".into(),
            self.target.user.as_str().into(),
            "--".into(),
            self.target.host.as_str().into(),
            command.into(),
        ]);
        args
    }

    fn scp_args(&self, local: &Path, remote: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-p".into()];
        args.extend(self.common_args("-P"));
        args.extend([
            "--".into(),
            local.as_os_str().to_os_string(),
            format!("{}@{}:{}", self.target.user, self.target.host, quote(remote)).into(),
        ]);
        args
    }

    fn common_args(&self, port_flag: &str) -> Vec<OsString> {
        vec![
            "-i".into(),
            self.target.key_path.as_os_str().to_os_string(),
            port_flag.into(),
            self.target.port.to_string().into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
        ]
    }
}

impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self), level = "debug")]
    fn run(&self, command: &str) -> Result<RemoteOutput> {
        let output = Command::new(&self.ssh_bin)
            .args(self.ssh_args(command))
            .output()
            .map_err(|source| RemoteError::Spawn {
                program: self.ssh_bin.clone(),
                source,
            })?;
        let result = RemoteOutput::from_bytes(&output.stdout, &output.stderr);

        if output.status.code() == Some(SSH_FAILURE_STATUS) {
            return Err(RemoteError::Connection {
                host: self.target.host.clone(),
                stderr: result.stderr_message(),
            });
        }
        debug!(
            "ssh {} returned {} stdout lines",
            self.target.host,
            result.stdout.len()
        );

        Ok(result)
    }

    #[instrument(skip(self), level = "debug")]
    fn copy_file(&self, local: &Path, remote: &str) -> Result<()> {
        let output = Command::new(&self.scp_bin)
            .args(self.scp_args(local, remote))
            .output()
            .map_err(|source| RemoteError::Spawn {
                program: self.scp_bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RemoteError::Transfer {
                local: local.to_path_buf(),
                remote: remote.into(),
                reason: RemoteOutput::from_bytes(&output.stdout, &output.stderr)
                    .stderr_message(),
            });
        }
        debug!("copied {:?} to {}:{remote}", local.display(), self.target.host);

        Ok(())
    }
}

/// Execution on this machine through `sh`.
///
/// Stands in for [`SshExecutor`] when the deploy target path is reachable
/// from the client host itself.
#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl RemoteExecutor for LocalExecutor {
    #[instrument(skip(self), level = "debug")]
    fn run(&self, command: &str) -> Result<RemoteOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|source| RemoteError::Spawn {
                program: "sh".into(),
                source,
            })?;
        Ok(RemoteOutput::from_bytes(&output.stdout, &output.stderr))
    }

    fn copy_file(&self, local: &Path, remote: &str) -> Result<()> {
        std::fs::copy(local, remote)
            .map(|_| ())
            .map_err(|error| RemoteError::Transfer {
                local: local.into(),
                remote: remote.into(),
                reason: error.to_string(),
            })
    }
}

/// Escape argument for a POSIX shell.
pub fn quote(arg: &str) -> Cow<'_, str> {
    escape(arg.into())
}

/// Remote execution error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Transport binary cannot be started.
    #[error("failed to run {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Deploy target cannot be reached.
    #[error("failed to connect to {host:?}: {stderr}")]
    Connection { host: String, stderr: String },

    /// File copy to deploy target failed.
    #[error("failed to copy {local:?} to {remote:?}: {reason}")]
    Transfer {
        local: PathBuf,
        remote: String,
        reason: String,
    },
}

/// Friendly result alias :3
type Result<T, E = RemoteError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    struct Canned(RemoteOutput);

    impl RemoteExecutor for Canned {
        fn run(&self, command: &str) -> Result<RemoteOutput> {
            let mut output = self.0.clone();
            if command.starts_with("( true )") {
                output.stdout.push(PROBE_SENTINEL.into());
            }
            Ok(output)
        }

        fn copy_file(&self, _local: &Path, _remote: &str) -> Result<()> {
            Ok(())
        }
    }

    fn target() -> SshTarget {
        SshTarget {
            host: "app01.example.org".into(),
            user: "deployer".into(),
            key_path: "/home/dev/.ssh/id_rsa".into(),
            port: 2222,
        }
    }

    #[test]
    fn split_output_lines() {
        let result = RemoteOutput::from_bytes(b"one  \ntwo\n", b"oops\r\n");
        let expect = RemoteOutput {
            stdout: vec!["one".into(), "two".into()],
            stderr: vec!["oops".into()],
        };
        assert_eq!(result, expect);
    }

    #[test_case("true", true; "success")]
    #[test_case("false", false; "failure")]
    #[test]
    fn probe_reports_outcome(command: &str, expect: bool) {
        let canned = Canned(RemoteOutput {
            stdout: vec!["listing".into()],
            stderr: Vec::new(),
        });

        let result = canned.run_probed(command).unwrap();
        pretty_assertions::assert_eq!(result.succeeded, expect);
        pretty_assertions::assert_eq!(result.output.stdout, vec!["listing".to_string()]);
    }

    #[test]
    fn ssh_arguments() {
        let ssh = SshExecutor::new(target());
        let result = ssh
            .ssh_args("ls -1a /srv")
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let expect = vec![
            "-i",
            "/home/dev/.ssh/id_rsa",
            "-p",
            "2222",
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-l",
            "deployer",
            "--",
            "app01.example.org",
            "ls -1a /srv",
        ];
        assert_eq!(result, expect);
    }

    #[test]
    fn scp_arguments_quote_remote_path() {
        let ssh = SshExecutor::new(target());
        let result = ssh
            .scp_args(Path::new("/tmp/.deploy"), "/srv/my app/.git/deploy/.deploy")
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(result[0], "-p");
        assert_eq!(result[3], "-P");
        assert_eq!(
            result.last().map(String::as_str),
            Some("deployer@app01.example.org:'/srv/my app/.git/deploy/.deploy'")
        );
    }

    #[test]
    fn missing_ssh_binary() {
        let ssh = SshExecutor::new(target()).with_binaries("/nonexistent/ssh", "/nonexistent/scp");
        assert!(matches!(ssh.run("true"), Err(RemoteError::Spawn { .. })));
        assert!(matches!(
            ssh.copy_file(Path::new("/tmp/x"), "/tmp/y"),
            Err(RemoteError::Spawn { .. })
        ));
    }
}
