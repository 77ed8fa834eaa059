//! Project-local repository: work tree present at the project dir.

use std::path::PathBuf;

use crate::error::{Result, WerfError};
use crate::lock::LockManager;
use crate::paths;

use super::archive::{create_archive_from_work_tree, Archive, ArchiveOptions};
use super::base;
use super::checksum::{checksum_work_tree, Checksum, ChecksumOptions};
use super::patch::{create_patch, Patch, PatchOptions};
use super::work_tree::{prepare_work_tree, with_work_tree_lock};
use super::GitRepo;

pub struct LocalGitRepo {
    name: String,
    path: PathBuf,
    locks: LockManager,
}

impl LocalGitRepo {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, locks: LockManager) -> Self {
        Self { name: name.into(), path: path.into(), locks }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn work_tree_dir(&self) -> PathBuf {
        paths::local_git_work_tree_dir(&self.path)
    }

    /// Prepare the shared work tree at `commit` and run `f` against it,
    /// holding the work-tree lock throughout.
    fn with_prepared_work_tree<T>(
        &self,
        commit: &str,
        with_submodules: bool,
        f: impl FnOnce(&std::path::Path) -> Result<T>,
    ) -> Result<T> {
        let work_tree = self.work_tree_dir();
        with_work_tree_lock(&self.locks, &work_tree, || {
            prepare_work_tree(&self.name, &self.path, &work_tree, commit, with_submodules)?;
            f(&work_tree)
        })
    }
}

impl GitRepo for LocalGitRepo {
    fn name(&self) -> &str {
        &self.name
    }

    fn head_commit(&self) -> Result<String> {
        let repo = base::open_repo(&self.name, &self.path)?;
        let head = repo.head().map_err(|e| {
            WerfError::git(&self.name, format!("cannot get repo head: {}", e.message()))
        })?;
        let commit = head.peel_to_commit().map_err(|e| {
            WerfError::git(&self.name, format!("cannot resolve repo head: {}", e.message()))
        })?;
        Ok(commit.id().to_string())
    }

    fn head_branch_name(&self) -> Result<String> {
        let repo = base::open_repo(&self.name, &self.path)?;
        base::head_branch_name(&repo, &self.name)
    }

    fn is_commit_exists(&self, commit: &str) -> Result<bool> {
        let repo = base::open_repo(&self.name, &self.path)?;
        base::is_commit_exists(&repo, &self.name, commit)
    }

    fn find_commit_id_by_message(&self, regex: &str) -> Result<Option<String>> {
        let head = self.head_commit()?;
        let repo = base::open_repo(&self.name, &self.path)?;
        base::find_commit_id_by_message(&repo, &self.name, regex, &head)
    }

    fn is_empty(&self) -> Result<bool> {
        let repo = base::open_repo(&self.name, &self.path)?;
        base::is_repo_empty(&repo, &self.name)
    }

    fn latest_branch_commit(&self, branch: &str) -> Result<String> {
        let repo = base::open_repo(&self.name, &self.path)?;
        base::find_reference_commit(&repo, &self.name, &format!("refs/heads/{}", branch))?
            .ok_or_else(|| {
                WerfError::git(&self.name, format!("unknown branch `{}`", branch))
            })
    }

    fn latest_tag_commit(&self, tag: &str) -> Result<String> {
        let repo = base::open_repo(&self.name, &self.path)?;
        base::find_reference_commit(&repo, &self.name, &format!("refs/tags/{}", tag))?
            .ok_or_else(|| WerfError::git(&self.name, format!("unknown tag `{}`", tag)))
    }

    fn remote_origin_url(&self) -> Result<Option<String>> {
        let repo = base::open_repo(&self.name, &self.path)?;
        base::remote_origin_url(&repo)
    }

    fn tags_list(&self) -> Result<Vec<String>> {
        let repo = base::open_repo(&self.name, &self.path)?;
        base::tags_list(&repo, &self.name)
    }

    fn remote_branches_list(&self) -> Result<Vec<String>> {
        let repo = base::open_repo(&self.name, &self.path)?;
        base::remote_branches_list(&repo, &self.name)
    }

    fn create_patch(&self, opts: &PatchOptions) -> Result<Patch> {
        let repo = base::open_repo(&self.name, &self.path)?;

        // A submodule-carrying target commit needs a resolved work tree
        // before the diff is meaningful to apply.
        if base::commit_has_submodules(&repo, &self.name, &opts.to_commit)? {
            self.with_prepared_work_tree(&opts.to_commit, true, |_| Ok(()))?;
        }

        create_patch(&repo, &self.name, opts)
    }

    fn create_archive(&self, opts: &ArchiveOptions) -> Result<Archive> {
        let repo = base::open_repo(&self.name, &self.path)?;
        let with_submodules = base::commit_has_submodules(&repo, &self.name, &opts.commit)?;

        self.with_prepared_work_tree(&opts.commit, with_submodules, |work_tree| {
            create_archive_from_work_tree(work_tree, &self.name, opts)
        })
    }

    fn checksum(&self, opts: &ChecksumOptions) -> Result<Checksum> {
        let repo = base::open_repo(&self.name, &self.path)?;
        let with_submodules = base::commit_has_submodules(&repo, &self.name, &opts.commit)?;

        self.with_prepared_work_tree(&opts.commit, with_submodules, |work_tree| {
            checksum_work_tree(work_tree, opts)
        })
    }
}
