// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git-based deployment under a remote advisory lock.
//!
//! A deployment is a short-lived session between a __client__ repository and
//! a single __deploy target__ host. The client starts the session by placing
//! a lock marker on the target over SSH, tags what it is about to ship, runs
//! the synchronization hooks that push the release and make the target pull
//! it, and finally drops the lock again. Every step is written to an activity
//! log kept on the target.
//!
//! # Deployment Lifecycle
//!
//! A deployment is always in one of two states: __idle__, where no lock
//! marker exists on the target, or __in progress__, where the lock is held and
//! a start tag may have been recorded locally. `start` moves from idle to in
//! progress. `sync`, `abort`, and `finish` move back to idle. `revert` rolls
//! the client repository back to an earlier deploy tag without leaving the in
//! progress state, optionally chaining straight into a `sync`.
//!
//! # Deploy Tags
//!
//! Each lifecycle event leaves an annotated tag in the client repository named
//! `<prefix>-<phase>-<YYYYMMDD-HHMMSS>`. Only `sync` tags count as deploys,
//! which is what `show-tag`, `log`, `diff`, and `revert` operate on.
//!
//! # See Also
//!
//! 1. [`DeployEngine`]
//! 2. [`DeployConfig`]
//! 3. [`HookRunner`]

pub mod config;
pub mod deploy_log;
pub mod engine;
pub mod error;
pub mod hook;
pub mod lock;
pub mod path;
pub mod remote;
pub mod state;
pub mod vcs;

pub use config::DeployConfig;
pub use deploy_log::DeployLog;
pub use engine::{DeployEngine, RevertOptions, RevertReport, SyncOptions, SyncReport};
pub use error::DeployError;
pub use hook::{HookContext, HookOutcome, HookReport, HookRunner};
pub use lock::DeployLock;
pub use remote::{LocalExecutor, RemoteExecutor, RemoteOutput, SshExecutor, SshTarget};
pub use state::{DeployState, StateFile};
pub use vcs::{Author, CommitId, Git2Vcs, VersionControl};
