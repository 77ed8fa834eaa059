//! Work-tree preparation.
//!
//! A work tree is a checked-out filesystem view of a commit, maintained as a
//! clone of the source repository so consecutive preparations reuse the
//! object store. The directory is shared state and is only entered under the
//! `git_work_tree {path}` lock.

use std::fs;
use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::Repository;
use tracing::{debug, info};

use super::base;
use crate::error::{Result, WerfError};
use crate::lock::{LockManager, LockOptions};

pub(crate) fn with_work_tree_lock<T>(
    locks: &LockManager,
    work_tree_dir: &Path,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let lock_name = format!("git_work_tree {}", work_tree_dir.display());
    locks.with_lock(&lock_name, LockOptions::with_default_timeout(), f)
}

/// Check out `commit` from `src_repo_path` into `work_tree_dir`, resolving
/// submodules when requested. Caller holds the work-tree lock.
pub(crate) fn prepare_work_tree(
    repo_name: &str,
    src_repo_path: &Path,
    work_tree_dir: &Path,
    commit: &str,
    with_submodules: bool,
) -> Result<()> {
    info!("Using work tree {}", work_tree_dir.display());

    let repo = open_or_clone(repo_name, src_repo_path, work_tree_dir)?;

    let oid = base::parse_oid(repo_name, commit)?;
    if repo.find_commit(oid).is_err() {
        debug!("commit {} not in work tree clone, fetching", commit);
        let mut remote = repo.find_remote("origin").map_err(|e| {
            WerfError::git(repo_name, format!("work tree has no origin remote: {}", e.message()))
        })?;
        remote
            .fetch(
                &["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"],
                None,
                None,
            )
            .map_err(|e| {
                WerfError::git(repo_name, format!("cannot fetch into work tree: {}", e.message()))
            })?;
    }

    let commit_obj = repo.find_commit(oid).map_err(|e| {
        WerfError::git(repo_name, format!("bad commit `{}`: {}", commit, e.message()))
    })?;

    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.checkout_tree(commit_obj.as_object(), Some(&mut checkout)).map_err(|e| {
        WerfError::git(repo_name, format!("cannot checkout `{}`: {}", commit, e.message()))
    })?;
    repo.set_head_detached(oid).map_err(|e| {
        WerfError::git(repo_name, format!("cannot set work tree head: {}", e.message()))
    })?;

    if with_submodules {
        update_submodules(&repo, repo_name)?;
    }

    Ok(())
}

fn open_or_clone(repo_name: &str, src: &Path, work_tree_dir: &Path) -> Result<Repository> {
    if work_tree_dir.join(".git").exists() {
        return base::open_repo(repo_name, work_tree_dir);
    }

    if let Some(parent) = work_tree_dir.parent() {
        fs::create_dir_all(parent).map_err(|e| WerfError::io(parent, e))?;
    }

    Repository::clone(&src.to_string_lossy(), work_tree_dir).map_err(|e| {
        WerfError::git(
            repo_name,
            format!("cannot clone `{}` into work tree: {}", src.display(), e.message()),
        )
    })
}

fn update_submodules(repo: &Repository, repo_name: &str) -> Result<()> {
    let submodules = repo.submodules().map_err(|e| {
        WerfError::git(repo_name, format!("cannot read submodules: {}", e.message()))
    })?;

    for mut submodule in submodules {
        let sub_path = submodule.path().to_path_buf();
        submodule.update(true, None).map_err(|e| {
            WerfError::git(
                repo_name,
                format!("cannot update submodule `{}`: {}", sub_path.display(), e.message()),
            )
        })?;
    }

    Ok(())
}
