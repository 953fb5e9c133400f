// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control logic.
//!
//! Every git operation the deployment engine needs goes through the
//! [`VersionControl`] trait. The engine never touches refs, indexes, or
//! working trees directly. [`Git2Vcs`] implements the trait on top of libgit2.

use auth_git2::GitAuthenticator;
use git2::{
    build::CheckoutBuilder, DiffFormat, ErrorCode, ObjectType, Oid, PushOptions,
    RemoteCallbacks, Repository, ResetType, Signature, Sort, StatusOptions,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};
use tracing::{debug, info, instrument};

/// Hexadecimal commit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<Oid> for CommitId {
    fn from(oid: Oid) -> Self {
        Self(oid.to_string())
    }
}

impl Display for CommitId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.0.as_str())
    }
}

/// Committer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Display for Author {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} <{}>", self.name, self.email)
    }
}

/// Git operations needed to tag, roll back, and ship deployments.
pub trait VersionControl {
    /// Create annotated tag `name` on the commit HEAD points to.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::TagCreation`] if HEAD cannot be resolved, or a
    ///   tag of the same name already exists.
    fn tag(&self, name: &str, author: &Author, message: &str) -> Result<()>;

    /// List sync tags of `prefix`, oldest deploy first.
    ///
    /// Tags are ordered by the commit time of the commit they point to, with
    /// the tag name breaking ties.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::TagListing`] if tags cannot be read.
    fn list_deploy_tags(&self, prefix: &str) -> Result<Vec<String>>;

    /// Resolve commit pointed to by tag.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::TagNotFound`] if tag does not exist.
    fn resolve_tag_commit(&self, tag: &str) -> Result<CommitId>;

    /// Walk commit history from HEAD, newest commit first.
    ///
    /// Every call starts a fresh traversal.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::History`] if traversal cannot be started, or
    ///   fails midway.
    fn commit_history(&self) -> Result<Box<dyn Iterator<Item = Result<CommitId>> + '_>>;

    /// Ensure index and working tree match HEAD.
    ///
    /// Untracked and ignored files do not count.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::DirtyWorktree`] if tracked files have uncommitted
    ///   changes.
    fn ensure_clean(&self) -> Result<()>;

    /// Apply the inverse of a commit to index and working tree without
    /// committing.
    ///
    /// The inverse is applied on top of the current index, so successive calls
    /// accumulate.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Revert`] if the inverse does not apply cleanly.
    fn revert_no_commit(&self, commit: &CommitId) -> Result<()>;

    /// Commit current index on top of HEAD.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Commit`] if commit cannot be written.
    /// - Return [`VcsError::CommitMismatch`] if HEAD does not point to the new
    ///   commit afterwards.
    fn commit(&self, author: &Author, message: &str) -> Result<CommitId>;

    /// Hard reset to commit of `tag`, or to HEAD if no tag is given.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Reset`] if reset fails.
    fn reset_head_to_tag(&self, tag: Option<&str>) -> Result<()>;

    /// Unified patch between two commits.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Diff`] if either commit cannot be read.
    fn diff(&self, from: &CommitId, to: &CommitId) -> Result<String>;

    /// Push branch and tags to remote.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Push`] if remote rejects or cannot be reached.
    fn push(&self, remote: &str, branch: &str, tags: &[String]) -> Result<()>;
}

/// Version control through libgit2.
pub struct Git2Vcs {
    repository: Repository,
}

impl Git2Vcs {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Open repository that contains `path`.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Git2`] if no repository can be found.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Repository::discover(path.as_ref())?))
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    fn find_commit(&self, id: &CommitId) -> Result<git2::Commit<'_>, git2::Error> {
        let oid = Oid::from_str(id.as_str())?;
        self.repository.find_commit(oid)
    }

    fn tag_commit(&self, tag: &str) -> Result<git2::Commit<'_>> {
        let reference = match self.repository.find_reference(&format!("refs/tags/{tag}")) {
            Ok(reference) => reference,
            Err(error) if error.code() == ErrorCode::NotFound => {
                return Err(VcsError::TagNotFound { tag: tag.into() })
            }
            Err(error) => return Err(VcsError::Git2(error)),
        };

        Ok(reference.peel_to_commit()?)
    }

    fn write_inverse(&self, commit: &git2::Commit<'_>) -> Result<(), git2::Error> {
        let ancestor = commit.tree()?;
        let theirs = match commit.parent(0) {
            Ok(parent) => parent.tree()?,
            // INVARIANT: Reverting a root commit removes everything it added.
            Err(_) => {
                let empty = self.repository.treebuilder(None)?.write()?;
                self.repository.find_tree(empty)?
            }
        };

        let mut index = self.repository.index()?;
        let ours = self.repository.find_tree(index.write_tree()?)?;
        let mut merged = self.repository.merge_trees(&ancestor, &ours, &theirs, None)?;
        if merged.has_conflicts() {
            return Err(git2::Error::from_str("reverted changes conflict with index"));
        }

        let tree = self
            .repository
            .find_tree(merged.write_tree_to(&self.repository)?)?;
        self.repository
            .checkout_tree(tree.as_object(), Some(CheckoutBuilder::new().force()))?;
        index.read_tree(&tree)?;
        index.write()?;

        Ok(())
    }
}

impl VersionControl for Git2Vcs {
    #[instrument(skip(self, author, message), level = "debug")]
    fn tag(&self, name: &str, author: &Author, message: &str) -> Result<()> {
        let into_error = |source| VcsError::TagCreation {
            name: name.into(),
            source,
        };

        let head = self
            .repository
            .head()
            .and_then(|head| head.peel(ObjectType::Commit))
            .map_err(into_error)?;
        let tagger = Signature::now(&author.name, &author.email).map_err(into_error)?;
        self.repository
            .tag(name, &head, &tagger, message, false)
            .map_err(into_error)?;
        info!("create tag {name:?}");

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn list_deploy_tags(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}-sync-*");
        let names = self
            .repository
            .tag_names(Some(pattern.as_str()))
            .map_err(VcsError::TagListing)?;

        let mut tags = Vec::new();
        for name in names.iter().flatten() {
            let commit = self
                .repository
                .find_reference(&format!("refs/tags/{name}"))
                .and_then(|reference| reference.peel_to_commit())
                .map_err(VcsError::TagListing)?;
            tags.push((commit.time().seconds(), name.to_string()));
        }

        // INVARIANT: Order by commit time, then by name.
        tags.sort();
        debug!("found {} deploy tags", tags.len());

        Ok(tags.into_iter().map(|(_, name)| name).collect())
    }

    fn resolve_tag_commit(&self, tag: &str) -> Result<CommitId> {
        Ok(self.tag_commit(tag)?.id().into())
    }

    fn commit_history(&self) -> Result<Box<dyn Iterator<Item = Result<CommitId>> + '_>> {
        let mut revwalk = self.repository.revwalk().map_err(VcsError::History)?;
        revwalk.push_head().map_err(VcsError::History)?;
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(VcsError::History)?;

        Ok(Box::new(revwalk.map(|oid| {
            oid.map(CommitId::from).map_err(VcsError::History)
        })))
    }

    fn ensure_clean(&self) -> Result<()> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repository.statuses(Some(&mut opts))?;

        let paths = statuses
            .iter()
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect::<Vec<_>>();
        if !paths.is_empty() {
            return Err(VcsError::DirtyWorktree { paths });
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn revert_no_commit(&self, commit: &CommitId) -> Result<()> {
        self.find_commit(commit)
            .and_then(|found| self.write_inverse(&found))
            .map_err(|source| VcsError::Revert {
                commit: commit.clone(),
                source,
            })?;
        debug!("revert {commit}");

        Ok(())
    }

    #[instrument(skip(self, author), level = "debug")]
    fn commit(&self, author: &Author, message: &str) -> Result<CommitId> {
        let mut index = self.repository.index().map_err(VcsError::Commit)?;
        let tree = index
            .write_tree()
            .and_then(|oid| self.repository.find_tree(oid))
            .map_err(VcsError::Commit)?;
        let parent = self
            .repository
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(VcsError::Commit)?;
        let signature = Signature::now(&author.name, &author.email).map_err(VcsError::Commit)?;
        let oid = self
            .repository
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &[&parent])
            .map_err(VcsError::Commit)?;
        self.repository.cleanup_state().map_err(VcsError::Commit)?;

        let head = self
            .repository
            .head()
            .ok()
            .and_then(|head| head.target());
        if head != Some(oid) {
            return Err(VcsError::CommitMismatch {
                expected: oid.into(),
            });
        }
        info!("commit {oid}: {message}");

        Ok(oid.into())
    }

    #[instrument(skip(self), level = "debug")]
    fn reset_head_to_tag(&self, tag: Option<&str>) -> Result<()> {
        let commit = match tag {
            Some(tag) => self.tag_commit(tag).map_err(|error| match error {
                VcsError::Git2(source) => VcsError::Reset(source),
                error => error,
            })?,
            None => self
                .repository
                .head()
                .and_then(|head| head.peel_to_commit())
                .map_err(VcsError::Reset)?,
        };

        self.repository
            .reset(commit.as_object(), ResetType::Hard, None)
            .map_err(VcsError::Reset)?;
        info!("reset HEAD to {}", commit.id());

        Ok(())
    }

    fn diff(&self, from: &CommitId, to: &CommitId) -> Result<String> {
        let old = self
            .find_commit(from)
            .and_then(|commit| commit.tree())
            .map_err(VcsError::Diff)?;
        let new = self
            .find_commit(to)
            .and_then(|commit| commit.tree())
            .map_err(VcsError::Diff)?;
        let diff = self
            .repository
            .diff_tree_to_tree(Some(&old), Some(&new), None)
            .map_err(VcsError::Diff)?;

        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })
        .map_err(VcsError::Diff)?;

        Ok(patch)
    }

    #[instrument(skip(self), level = "debug")]
    fn push(&self, remote: &str, branch: &str, tags: &[String]) -> Result<()> {
        let into_error = |source| VcsError::Push {
            remote: remote.into(),
            source,
        };

        let mut origin = self.repository.find_remote(remote).map_err(into_error)?;
        let config = self.repository.config().map_err(into_error)?;
        let authenticator = GitAuthenticator::default();

        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.push_update_reference(|refname, status| match status {
            Some(reason) => Err(git2::Error::from_str(&format!(
                "remote rejected {refname}: {reason}"
            ))),
            None => Ok(()),
        });

        let mut refspecs = vec![format!("refs/heads/{branch}:refs/heads/{branch}")];
        refspecs.extend(tags.iter().map(|tag| format!("refs/tags/{tag}:refs/tags/{tag}")));

        let mut po = PushOptions::new();
        po.remote_callbacks(rc);
        origin.push(&refspecs, Some(&mut po)).map_err(into_error)?;
        info!("push {branch} and {} tags to {remote}", tags.len());

        Ok(())
    }
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Tag cannot be created.
    #[error("failed to create tag {name:?}")]
    TagCreation {
        name: String,
        #[source]
        source: git2::Error,
    },

    /// Tags cannot be listed.
    #[error("failed to list deploy tags")]
    TagListing(#[source] git2::Error),

    /// Tag does not exist.
    #[error("tag {tag:?} not found")]
    TagNotFound { tag: String },

    /// Commit history cannot be walked.
    #[error("failed to walk commit history")]
    History(#[source] git2::Error),

    /// Commit cannot be reverted.
    #[error("failed to revert commit {commit}")]
    Revert {
        commit: CommitId,
        #[source]
        source: git2::Error,
    },

    /// Tracked files have uncommitted changes.
    #[error("uncommitted changes in {}", paths.join(", "))]
    DirtyWorktree { paths: Vec<String> },

    /// Commit cannot be written.
    #[error("failed to commit")]
    Commit(#[source] git2::Error),

    /// HEAD does not point to a freshly written commit.
    #[error("HEAD does not match new commit {expected}")]
    CommitMismatch { expected: CommitId },

    /// Hard reset failed.
    #[error("failed to reset HEAD")]
    Reset(#[source] git2::Error),

    /// Diff cannot be computed.
    #[error("failed to diff deploy tags")]
    Diff(#[source] git2::Error),

    /// Push to remote failed.
    #[error("failed to push to remote {remote:?}")]
    Push {
        remote: String,
        #[source]
        source: git2::Error,
    },

    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
type Result<T, E = VcsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{RepositoryInitOptions, Time};
    use pretty_assertions::assert_eq;
    use std::fs::{read_to_string, write};
    use tempfile::TempDir;

    struct Sandbox {
        _dir: TempDir,
        vcs: Git2Vcs,
    }

    impl Sandbox {
        fn new() -> anyhow::Result<Self> {
            let dir = tempfile::tempdir()?;
            let mut opts = RepositoryInitOptions::new();
            opts.initial_head("main");
            let repository = Repository::init_opts(dir.path(), &opts)?;
            Ok(Self {
                _dir: dir,
                vcs: Git2Vcs::new(repository),
            })
        }

        fn workdir(&self) -> &Path {
            self.vcs.repository().workdir().unwrap()
        }

        fn commit_file(&self, name: &str, contents: &str, time: i64) -> anyhow::Result<Oid> {
            let repository = self.vcs.repository();
            write(self.workdir().join(name), contents)?;
            let mut index = repository.index()?;
            index.add_path(Path::new(name))?;
            index.write()?;
            let tree = repository.find_tree(index.write_tree()?)?;
            let signature = Signature::new("John Doe", "john@doe.com", &Time::new(time, 0))?;
            let parent = repository.head().ok().and_then(|head| head.target());
            let parents = match parent {
                Some(oid) => vec![repository.find_commit(oid)?],
                None => Vec::new(),
            };
            let parents = parents.iter().collect::<Vec<_>>();
            Ok(repository.commit(Some("HEAD"), &signature, &signature, name, &tree, &parents)?)
        }
    }

    fn author() -> Author {
        Author::new("John Doe", "john@doe.com")
    }

    #[test]
    fn tag_refuses_to_overwrite() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        sandbox.commit_file("app.txt", "v1", 1_000)?;

        sandbox.vcs.tag("shop-sync-20250101-000000", &author(), "GitDeploy Tag.")?;
        let result = sandbox.vcs.tag("shop-sync-20250101-000000", &author(), "GitDeploy Tag.");
        assert!(matches!(result, Err(VcsError::TagCreation { .. })));

        Ok(())
    }

    #[test]
    fn dirty_tracked_files_are_reported() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        sandbox.commit_file("app.txt", "v1", 1_000)?;
        write(sandbox.workdir().join("notes.txt"), "untracked")?;
        sandbox.vcs.ensure_clean()?;

        write(sandbox.workdir().join("app.txt"), "local edit")?;
        let result = sandbox.vcs.ensure_clean();
        assert!(matches!(
            &result,
            Err(VcsError::DirtyWorktree { paths }) if paths == &["app.txt"]
        ));

        Ok(())
    }

    #[test]
    fn tag_on_unborn_head_fails() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let result = sandbox.vcs.tag("shop-start-20250101-000000", &author(), "GitDeploy Tag.");
        assert!(matches!(result, Err(VcsError::TagCreation { .. })));

        Ok(())
    }

    #[test]
    fn list_deploy_tags_orders_by_commit_time() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        sandbox.commit_file("app.txt", "v1", 1_000)?;
        // Name sorts first, but commit is newer.
        sandbox.commit_file("app.txt", "v2", 2_000)?;
        sandbox.vcs.tag("shop-sync-00000000-000000", &author(), "GitDeploy Tag.")?;

        let repository = sandbox.vcs.repository();
        let first = repository.head()?.peel_to_commit()?.parent(0)?;
        repository.tag(
            "shop-sync-99999999-000000",
            first.as_object(),
            &Signature::now("John Doe", "john@doe.com")?,
            "GitDeploy Tag.",
            false,
        )?;
        sandbox.vcs.tag("shop-start-20250101-000000", &author(), "GitDeploy Tag.")?;
        sandbox.vcs.tag("other-sync-20250101-000000", &author(), "GitDeploy Tag.")?;

        let result = sandbox.vcs.list_deploy_tags("shop")?;
        assert_eq!(
            result,
            vec!["shop-sync-99999999-000000", "shop-sync-00000000-000000"]
        );

        Ok(())
    }

    #[test]
    fn resolve_missing_tag() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        sandbox.commit_file("app.txt", "v1", 1_000)?;

        let result = sandbox.vcs.resolve_tag_commit("nope");
        assert!(matches!(result, Err(VcsError::TagNotFound { tag }) if tag == "nope"));

        Ok(())
    }

    #[test]
    fn successive_reverts_accumulate() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let base = sandbox.commit_file("app.txt", "v1", 1_000)?;
        let second = sandbox.commit_file("app.txt", "v2", 2_000)?;
        let third = sandbox.commit_file("extra.txt", "more", 3_000)?;

        let history = sandbox.vcs.commit_history()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(
            history,
            vec![third.into(), second.into(), CommitId::from(base)]
        );

        sandbox.vcs.revert_no_commit(&third.into())?;
        sandbox.vcs.revert_no_commit(&second.into())?;
        let rollback = sandbox.vcs.commit(&author(), "Rollback to base.")?;

        assert_eq!(read_to_string(sandbox.workdir().join("app.txt"))?, "v1");
        assert!(!sandbox.workdir().join("extra.txt").exists());
        let repository = sandbox.vcs.repository();
        let head = repository.head()?.peel_to_commit()?;
        assert_eq!(CommitId::from(head.id()), rollback);
        assert_eq!(head.tree_id(), repository.find_commit(base)?.tree_id());

        Ok(())
    }

    #[test]
    fn reset_discards_partial_revert() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        sandbox.commit_file("app.txt", "v1", 1_000)?;
        let second = sandbox.commit_file("app.txt", "v2", 2_000)?;

        sandbox.vcs.revert_no_commit(&second.into())?;
        assert_eq!(read_to_string(sandbox.workdir().join("app.txt"))?, "v1");
        sandbox.vcs.reset_head_to_tag(None)?;
        assert_eq!(read_to_string(sandbox.workdir().join("app.txt"))?, "v2");

        Ok(())
    }

    #[test]
    fn diff_between_commits() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let first = sandbox.commit_file("app.txt", "v1\n", 1_000)?;
        let second = sandbox.commit_file("app.txt", "v2\n", 2_000)?;

        let patch = sandbox.vcs.diff(&first.into(), &second.into())?;
        assert!(patch.contains("-v1\n"));
        assert!(patch.contains("+v2\n"));
        assert_eq!(sandbox.vcs.diff(&second.into(), &second.into())?, "");

        Ok(())
    }

    #[test]
    fn author_display() {
        assert_eq!(author().to_string(), "John Doe <john@doe.com>");
    }
}
