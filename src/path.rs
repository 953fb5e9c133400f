// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where git-deploy keeps its files. Some of these paths live on the
//! client, like the hook directories and the local deploy state. Others live
//! on the deploy target, like the lock marker and the activity logs, and are
//! therefore plain POSIX strings rather than [`PathBuf`]s.

use std::{
    ffi::OsStr,
    path::{Component, Path, PathBuf},
};

/// Deployment directory relative to a repository root.
///
/// Exists on both sides: the client keeps its state file here, the target
/// keeps the lock marker and activity logs here.
pub const DEPLOY_DIR: &str = ".git/deploy";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the SSH key used to reach the target.
///
/// Uses `$HOME/.ssh/id_rsa`. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_key_path() -> Result<PathBuf> {
    home_dir().map(|home| home.join(".ssh").join("id_rsa"))
}

/// Deployment directory of a client repository.
pub fn local_deploy_dir(top_dir: impl AsRef<Path>) -> PathBuf {
    top_dir.as_ref().join(DEPLOY_DIR)
}

/// Deployment directory on the deploy target.
pub fn remote_deploy_dir(root: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return format!("/{DEPLOY_DIR}");
    }

    format!("{root}/{DEPLOY_DIR}")
}

/// Hook directory layout.
///
/// Hooks are grouped by where they apply:
///
/// - `apps/common`: pre-sync and post-sync hooks that run for every
///   environment.
/// - `apps/<env>`: pre-sync and post-sync hooks of one environment.
/// - `sync`: the synchronization hooks themselves, phased by environment name
///   or `default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookLayout {
    root: PathBuf,
}

impl HookLayout {
    /// Construct new hook layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Top-level hook directory.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Hooks shared by every environment.
    pub fn common(&self) -> PathBuf {
        self.root.join("apps").join("common")
    }

    /// Hooks of environment `env`.
    pub fn env(&self, env: &str) -> PathBuf {
        self.root.join("apps").join(env)
    }

    /// Synchronization hooks.
    pub fn sync(&self) -> PathBuf {
        self.root.join("sync")
    }
}

/// Check that environment name `env` names a single directory.
///
/// Names like `../sync`, `a/b`, or `/etc` would resolve outside of `apps/`.
pub fn is_env_name(env: &str) -> bool {
    let components = Path::new(env).components().collect::<Vec<_>>();
    matches!(components.as_slice(), [Component::Normal(name)] if *name == OsStr::new(env))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("/srv/app", "/srv/app/.git/deploy"; "plain root")]
    #[test_case("/srv/app/", "/srv/app/.git/deploy"; "trailing slash")]
    #[test_case("/", "/.git/deploy"; "filesystem root")]
    #[test]
    fn remote_deploy_dir_joins_posix_paths(root: &str, expect: &str) {
        pretty_assertions::assert_eq!(remote_deploy_dir(root), expect);
    }

    #[test]
    fn hook_layout_directories() {
        let layout = HookLayout::new("/client/hooks");
        assert_eq!(layout.common(), PathBuf::from("/client/hooks/apps/common"));
        assert_eq!(layout.env("prod"), PathBuf::from("/client/hooks/apps/prod"));
        assert_eq!(layout.sync(), PathBuf::from("/client/hooks/sync"));
    }

    #[test_case("prod", true; "plain name")]
    #[test_case("eu-west", true; "dashed name")]
    #[test_case("", false; "empty")]
    #[test_case("..", false; "parent")]
    #[test_case(".", false; "current")]
    #[test_case("../sync", false; "escapes apps")]
    #[test_case("prod/eu", false; "nested")]
    #[test_case("prod/", false; "trailing slash")]
    #[test_case("/etc", false; "absolute")]
    #[test]
    fn env_names_stay_inside_apps(env: &str, expect: bool) {
        pretty_assertions::assert_eq!(is_env_name(env), expect);
    }
}
