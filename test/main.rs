// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use git2::{
    IndexEntry, IndexTime, Oid, Repository, RepositoryInitOptions, Signature, Time,
};
use git_deploy::{Author, DeployConfig, DeployEngine, Git2Vcs, LocalExecutor};
use std::{
    fs::{create_dir_all, read_dir, set_permissions, write, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

pub(crate) struct RepoFixture {
    repo: Repository,
}

impl RepoFixture {
    pub(crate) fn new(path: impl AsRef<Path>, kind: RepoKind) -> Result<Self> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        opts.bare(kind.is_bare());
        let repo = Repository::init_opts(path.as_ref(), &opts)?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = repo.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        Ok(Self { repo })
    }

    pub(crate) fn repo(&self) -> &Repository {
        &self.repo
    }

    pub(crate) fn head(&self) -> Result<Oid> {
        Ok(self.repo.head()?.peel_to_commit()?.id())
    }

    pub(crate) fn head_message(&self) -> Result<String> {
        let commit = self.repo.head()?.peel_to_commit()?;
        Ok(commit.message().unwrap_or_default().to_string())
    }

    pub(crate) fn tree_of(&self, oid: Oid) -> Result<Oid> {
        Ok(self.repo.find_commit(oid)?.tree_id())
    }

    /// Stage and commit file on HEAD at commit time `time`.
    pub(crate) fn commit_at(
        &self,
        filename: impl AsRef<Path>,
        contents: impl AsRef<str>,
        time: i64,
    ) -> Result<Oid> {
        let entry = IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            file_size: contents.as_ref().len() as u32,
            id: self.repo.blob(contents.as_ref().as_bytes())?,
            flags: 0,
            flags_extended: 0,
            path: filename.as_ref().as_os_str().to_string_lossy().into_owned().as_bytes().to_vec(),
        };

        // INVARIANT: Keep work tree in step with index for non-bare repositories.
        if let Some(workdir) = self.repo.workdir() {
            write(workdir.join(filename.as_ref()), contents.as_ref())?;
        }

        // INVARIANT: Always use new tree produced by index after staging new entry.
        let mut index = self.repo.index()?;
        index.add_frombuffer(&entry, contents.as_ref().as_bytes())?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        // INVARIANT: Always determine latest parent commits to append to.
        let signature = Signature::new("John Doe", "john@doe.com", &Time::new(time, 0))?;
        let mut parents = Vec::new();
        if let Some(parent) = self.repo.head().ok().and_then(|head| head.target()) {
            parents.push(self.repo.find_commit(parent)?);
        }
        let parents = parents.iter().collect::<Vec<_>>();

        // INVARIANT: Commit to HEAD by appending to obtained parent commits.
        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            format!("chore: add {:?}", filename.as_ref()).as_ref(),
            &tree,
            &parents,
        )?;

        Ok(oid)
    }

    /// Commit that no branch points to.
    pub(crate) fn dangling_commit(&self, contents: impl AsRef<str>, time: i64) -> Result<Oid> {
        let mut builder = self.repo.treebuilder(None)?;
        builder.insert("stray.txt", self.repo.blob(contents.as_ref().as_bytes())?, 0o100644)?;
        let tree = self.repo.find_tree(builder.write()?)?;
        let signature = Signature::new("John Doe", "john@doe.com", &Time::new(time, 0))?;

        Ok(self
            .repo
            .commit(None, &signature, &signature, "stray", &tree, &[])?)
    }

    /// Annotated tag on `target`.
    pub(crate) fn tag(&self, name: &str, target: Oid) -> Result<()> {
        let object = self.repo.find_object(target, None)?;
        let signature = self.repo.signature()?;
        self.repo.tag(name, &object, &signature, "GitDeploy Tag.", false)?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) enum RepoKind {
    #[default]
    Bare,

    Normal,
}

impl RepoKind {
    pub(crate) fn is_bare(&self) -> bool {
        match self {
            Self::Bare => true,
            Self::Normal => false,
        }
    }
}

/// Client repository, hook directory, and deploy target side by side.
///
/// ```text
/// <root>/client   client repository
/// <root>/hooks    hook directory
/// <root>/target   deploy target root
/// ```
pub(crate) struct DeployFixture {
    root: TempDir,
    pub(crate) client: RepoFixture,
}

impl DeployFixture {
    pub(crate) fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        let client = RepoFixture::new(root.path().join("client"), RepoKind::Normal)?;
        create_dir_all(root.path().join("target"))?;

        Ok(Self { root, client })
    }

    pub(crate) fn root(&self) -> &Path {
        self.root.path()
    }

    pub(crate) fn config(&self) -> DeployConfig {
        DeployConfig {
            repo_name: "shop".into(),
            hook_dir: "hooks".into(),
            path: self.target_dir().to_string_lossy().into_owned(),
            user: "deployer".into(),
            target: "localhost".into(),
            remote: "origin".into(),
            branch: "main".into(),
            client_path: self.root().to_path_buf(),
            key_path: "/dev/null".into(),
            port: 22,
            abort_reset: true,
            top_dir: self.root().join("client"),
            author: Author::new("John Doe", "john@doe.com"),
        }
    }

    pub(crate) fn engine(&self) -> Result<DeployEngine<Git2Vcs, LocalExecutor>> {
        self.engine_with(self.config())
    }

    pub(crate) fn engine_with(
        &self,
        config: DeployConfig,
    ) -> Result<DeployEngine<Git2Vcs, LocalExecutor>> {
        Ok(DeployEngine::new(config, self.vcs()?, LocalExecutor))
    }

    /// Fresh handle on the client repository.
    pub(crate) fn vcs(&self) -> Result<Git2Vcs> {
        Ok(Git2Vcs::new(Repository::open(self.root().join("client"))?))
    }

    pub(crate) fn target_dir(&self) -> PathBuf {
        self.root().join("target")
    }

    pub(crate) fn deploy_dir(&self) -> PathBuf {
        self.target_dir().join(".git").join("deploy")
    }

    /// Lock markers on the deploy target.
    pub(crate) fn lock_markers(&self) -> Result<Vec<String>> {
        let dir = self.deploy_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut markers = Vec::new();
        for entry in read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with("lock-") {
                markers.push(name);
            }
        }
        markers.sort();

        Ok(markers)
    }

    /// Write executable hook at `<root>/hooks/<rel>`.
    pub(crate) fn hook(&self, rel: impl AsRef<Path>, body: &str) -> Result<PathBuf> {
        let path = self.root().join("hooks").join(rel.as_ref());
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        write(&path, body)?;
        set_permissions(&path, Permissions::from_mode(0o755))?;

        Ok(path)
    }

    /// Hook body appending `word` to the trace file.
    pub(crate) fn tracing_hook(&self, word: &str, status: u8) -> String {
        format!(
            "#!/bin/sh\necho {word} >> {}\nexit {status}\n",
            self.trace_path().display()
        )
    }

    pub(crate) fn trace_path(&self) -> PathBuf {
        self.root().join("trace")
    }
}
