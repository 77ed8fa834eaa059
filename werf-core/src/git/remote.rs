//! Remote repository: bare clone cached under the werf home, keyed by
//! endpoint host and path inside a cache-version-stamped parent.

use std::fs;
use std::path::PathBuf;

use git2::build::RepoBuilder;
use tracing::info;

use crate::error::{Result, WerfError};
use crate::lock::{LockManager, LockOptions};
use crate::paths;

use super::archive::{create_archive_from_work_tree, Archive, ArchiveOptions};
use super::base;
use super::checksum::{checksum_work_tree, Checksum, ChecksumOptions};
use super::patch::{create_patch, Patch, PatchOptions};
use super::work_tree::{prepare_work_tree, with_work_tree_lock};
use super::GitRepo;

const FETCH_REFSPECS: [&str; 2] =
    ["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"];

pub struct RemoteGitRepo {
    name: String,
    url: String,
    clone_path: PathBuf,
    work_tree_dir: PathBuf,
    is_dry_run: bool,
    locks: LockManager,
}

impl RemoteGitRepo {
    pub fn open(name: impl Into<String>, url: impl Into<String>, locks: LockManager) -> Result<Self> {
        let url = url.into();
        Ok(Self {
            name: name.into(),
            clone_path: paths::remote_git_clone_path(&url)?,
            work_tree_dir: paths::remote_git_work_tree_dir(&url)?,
            url,
            is_dry_run: false,
            locks,
        })
    }

    pub fn dry_run(mut self) -> Self {
        self.is_dry_run = true;
        self
    }

    pub fn clone_path(&self) -> &std::path::Path {
        &self.clone_path
    }

    /// Clone the repository into the cache if absent, otherwise refresh it.
    pub fn clone_and_fetch(&self) -> Result<()> {
        if self.clone()? {
            return Ok(());
        }
        self.fetch()
    }

    /// Returns true when a fresh clone was made.
    fn clone(&self) -> Result<bool> {
        if self.is_dry_run || self.clone_path.exists() {
            return Ok(false);
        }

        self.with_remote_repo_lock(|| {
            // Raced against a cooperating process; re-check under the lock.
            if self.clone_path.exists() {
                return Ok(false);
            }

            info!("Clone {}", self.url);

            let parent = self.clone_path.parent().ok_or_else(|| {
                WerfError::git(&self.name, format!("bad clone path `{}`", self.clone_path.display()))
            })?;
            fs::create_dir_all(parent).map_err(|e| WerfError::io(parent, e))?;

            // Clone into a sibling temp dir, then rename into place so a
            // killed clone never leaves a half-populated cache entry.
            let staging = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
            let result = RepoBuilder::new().bare(true).clone(&self.url, &staging);

            match result {
                Ok(repo) => {
                    // Make sure origin tracking refs exist regardless of the
                    // clone's default refspec.
                    drop(repo);
                    fs::rename(&staging, &self.clone_path)
                        .map_err(|e| WerfError::io(&self.clone_path, e))?;
                    self.fetch_refs()?;
                    Ok(true)
                }
                Err(e) => {
                    let _ = fs::remove_dir_all(&staging);
                    Err(WerfError::git(
                        &self.name,
                        format!("cannot clone `{}`: {}", self.url, e.message()),
                    ))
                }
            }
        })
    }

    fn fetch(&self) -> Result<()> {
        if self.is_dry_run {
            return Ok(());
        }

        self.with_remote_repo_lock(|| {
            let repo = base::open_repo(&self.name, &self.clone_path)?;

            // The cached clone may predate a url move.
            let current_url = base::remote_origin_url(&repo)?;
            if current_url.as_deref() != Some(self.url.as_str()) {
                repo.remote_set_url("origin", &self.url).map_err(|e| {
                    WerfError::git(&self.name, format!("cannot update remote url: {}", e.message()))
                })?;
            }

            info!("Fetch remote origin of {}", self.url);
            self.fetch_refs()
        })
    }

    fn fetch_refs(&self) -> Result<()> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        let mut remote = repo.find_remote("origin").map_err(|e| {
            WerfError::git(&self.name, format!("repo has no origin remote: {}", e.message()))
        })?;

        remote.fetch(&FETCH_REFSPECS, None, None).map_err(|e| {
            WerfError::git(
                &self.name,
                format!("cannot fetch remote origin of repo `{}`: {}", self.url, e.message()),
            )
        })
    }

    fn with_remote_repo_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_name = format!("remote_git_path.{}", self.name);
        self.locks.with_lock(&lock_name, LockOptions::with_default_timeout(), f)
    }

    fn with_prepared_work_tree<T>(
        &self,
        commit: &str,
        with_submodules: bool,
        f: impl FnOnce(&std::path::Path) -> Result<T>,
    ) -> Result<T> {
        with_work_tree_lock(&self.locks, &self.work_tree_dir, || {
            prepare_work_tree(&self.name, &self.clone_path, &self.work_tree_dir, commit, with_submodules)?;
            f(&self.work_tree_dir)
        })
    }
}

impl GitRepo for RemoteGitRepo {
    fn name(&self) -> &str {
        &self.name
    }

    fn head_commit(&self) -> Result<String> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        let branch = base::head_branch_name(&repo, &self.name)?;

        let tracking = format!("refs/remotes/origin/{}", branch);
        if let Some(commit) = base::find_reference_commit(&repo, &self.name, &tracking)? {
            return Ok(commit);
        }

        base::find_reference_commit(&repo, &self.name, &format!("refs/heads/{}", branch))?
            .ok_or_else(|| {
                WerfError::git(&self.name, format!("cannot resolve reference `{}`", tracking))
            })
    }

    fn head_branch_name(&self) -> Result<String> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        base::head_branch_name(&repo, &self.name)
    }

    fn is_commit_exists(&self, commit: &str) -> Result<bool> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        base::is_commit_exists(&repo, &self.name, commit)
    }

    fn find_commit_id_by_message(&self, regex: &str) -> Result<Option<String>> {
        let head = self
            .head_commit()
            .map_err(|e| WerfError::git(&self.name, format!("error getting head commit: {}", e)))?;
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        base::find_commit_id_by_message(&repo, &self.name, regex, &head)
    }

    fn is_empty(&self) -> Result<bool> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        base::is_repo_empty(&repo, &self.name)
    }

    fn latest_branch_commit(&self, branch: &str) -> Result<String> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;

        let tracking = format!("refs/remotes/origin/{}", branch);
        if let Some(commit) = base::find_reference_commit(&repo, &self.name, &tracking)? {
            info!("Using commit `{}` of repo `{}` branch `{}`", commit, self.name, branch);
            return Ok(commit);
        }

        base::find_reference_commit(&repo, &self.name, &format!("refs/heads/{}", branch))?
            .ok_or_else(|| WerfError::git(&self.name, format!("unknown branch `{}`", branch)))
    }

    fn latest_tag_commit(&self, tag: &str) -> Result<String> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        let commit = base::find_reference_commit(&repo, &self.name, &format!("refs/tags/{}", tag))?
            .ok_or_else(|| WerfError::git(&self.name, format!("unknown tag `{}`", tag)))?;

        info!("Using commit `{}` of repo `{}` tag `{}`", commit, self.name, tag);
        Ok(commit)
    }

    fn remote_origin_url(&self) -> Result<Option<String>> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        base::remote_origin_url(&repo)
    }

    fn tags_list(&self) -> Result<Vec<String>> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        base::tags_list(&repo, &self.name)
    }

    fn remote_branches_list(&self) -> Result<Vec<String>> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        base::remote_branches_list(&repo, &self.name)
    }

    fn create_patch(&self, opts: &PatchOptions) -> Result<Patch> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;

        if base::commit_has_submodules(&repo, &self.name, &opts.to_commit)? {
            self.with_prepared_work_tree(&opts.to_commit, true, |_| Ok(()))?;
        }

        create_patch(&repo, &self.name, opts)
    }

    fn create_archive(&self, opts: &ArchiveOptions) -> Result<Archive> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        let with_submodules = base::commit_has_submodules(&repo, &self.name, &opts.commit)?;

        self.with_prepared_work_tree(&opts.commit, with_submodules, |work_tree| {
            create_archive_from_work_tree(work_tree, &self.name, opts)
        })
    }

    fn checksum(&self, opts: &ChecksumOptions) -> Result<Checksum> {
        let repo = base::open_repo(&self.name, &self.clone_path)?;
        let with_submodules = base::commit_has_submodules(&repo, &self.name, &opts.commit)?;

        self.with_prepared_work_tree(&opts.commit, with_submodules, |work_tree| {
            checksum_work_tree(work_tree, opts)
        })
    }
}
