//! Shared git plumbing for both repository kinds.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use git2::{Oid, Repository};

use crate::error::{Result, WerfError};

pub(crate) fn open_repo(repo_name: &str, path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|e| {
        WerfError::git(repo_name, format!("cannot open repo `{}`: {}", path.display(), e.message()))
    })
}

pub(crate) fn parse_oid(repo_name: &str, commit: &str) -> Result<Oid> {
    Oid::from_str(commit).map_err(|e| {
        WerfError::git(repo_name, format!("bad commit hash `{}`: {}", commit, e.message()))
    })
}

pub(crate) fn resolve_commit<'r>(
    repo: &'r Repository,
    repo_name: &str,
    commit: &str,
) -> Result<git2::Commit<'r>> {
    let oid = parse_oid(repo_name, commit)?;
    repo.find_commit(oid).map_err(|e| {
        WerfError::git(repo_name, format!("bad commit `{}`: {}", commit, e.message()))
    })
}

pub(crate) fn is_commit_exists(repo: &Repository, repo_name: &str, commit: &str) -> Result<bool> {
    let oid = parse_oid(repo_name, commit)?;
    Ok(repo.find_commit(oid).is_ok())
}

/// Breadth-first walk from `head`; the first commit whose message matches
/// `regex` wins.
pub(crate) fn find_commit_id_by_message(
    repo: &Repository,
    repo_name: &str,
    regex: &str,
    head: &str,
) -> Result<Option<String>> {
    let matcher = regex::Regex::new(regex)
        .map_err(|e| WerfError::git(repo_name, format!("bad regex `{}`: {}", regex, e)))?;

    let head_oid = parse_oid(repo_name, head)?;
    let mut queue = VecDeque::from([head_oid]);
    let mut seen: HashSet<Oid> = HashSet::from([head_oid]);

    while let Some(oid) = queue.pop_front() {
        let commit = repo.find_commit(oid).map_err(|e| {
            WerfError::git(repo_name, format!("bad commit `{}`: {}", oid, e.message()))
        })?;

        if matcher.is_match(commit.message().unwrap_or_default()) {
            return Ok(Some(oid.to_string()));
        }

        for parent in commit.parent_ids() {
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }

    Ok(None)
}

pub(crate) fn is_repo_empty(repo: &Repository, repo_name: &str) -> Result<bool> {
    let mut walk = repo
        .revwalk()
        .map_err(|e| WerfError::git(repo_name, format!("cannot walk commits: {}", e.message())))?;
    let _ = walk.push_glob("refs/*");
    let _ = walk.push_head();

    Ok(walk.next().is_none())
}

/// Branch name HEAD refers to; `NotABranch` on a detached HEAD.
pub(crate) fn head_branch_name(repo: &Repository, repo_name: &str) -> Result<String> {
    let head = repo.find_reference("HEAD").map_err(|e| {
        WerfError::git(repo_name, format!("cannot get repo head: {}", e.message()))
    })?;

    match head.symbolic_target() {
        Some(target) => target
            .strip_prefix("refs/heads/")
            .map(str::to_string)
            .ok_or(WerfError::NotABranch),
        None => Err(WerfError::NotABranch),
    }
}

pub(crate) fn remote_origin_url(repo: &Repository) -> Result<Option<String>> {
    match repo.find_remote("origin") {
        Ok(remote) => Ok(remote.url().map(str::to_string)),
        Err(_) => Ok(None),
    }
}

/// Commit a fully-qualified reference points at, peeling annotated tags.
pub(crate) fn find_reference_commit(
    repo: &Repository,
    repo_name: &str,
    refname: &str,
) -> Result<Option<String>> {
    match repo.find_reference(refname) {
        Ok(reference) => {
            let commit = reference.peel_to_commit().map_err(|e| {
                WerfError::git(
                    repo_name,
                    format!("cannot resolve reference `{}`: {}", refname, e.message()),
                )
            })?;
            Ok(Some(commit.id().to_string()))
        }
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(WerfError::git(
            repo_name,
            format!("cannot resolve reference `{}`: {}", refname, e.message()),
        )),
    }
}

pub(crate) fn tags_list(repo: &Repository, repo_name: &str) -> Result<Vec<String>> {
    let names = repo
        .tag_names(None)
        .map_err(|e| WerfError::git(repo_name, format!("cannot list tags: {}", e.message())))?;
    Ok(names.iter().flatten().map(str::to_string).collect())
}

pub(crate) fn remote_branches_list(repo: &Repository, repo_name: &str) -> Result<Vec<String>> {
    let references = repo.references().map_err(|e| {
        WerfError::git(repo_name, format!("cannot list references: {}", e.message()))
    })?;

    let prefix = "refs/remotes/origin/";
    let mut branches = Vec::new();
    for reference in references.flatten() {
        if let Some(name) = reference.name().and_then(|n| n.strip_prefix(prefix)) {
            if name != "HEAD" {
                branches.push(name.to_string());
            }
        }
    }

    Ok(branches)
}

/// Whether the commit tree carries a `.gitmodules` entry.
pub(crate) fn commit_has_submodules(
    repo: &Repository,
    repo_name: &str,
    commit: &str,
) -> Result<bool> {
    let commit = resolve_commit(repo, repo_name, commit)?;
    let tree = commit.tree().map_err(|e| {
        WerfError::git(repo_name, format!("cannot read tree of `{}`: {}", commit.id(), e.message()))
    })?;

    Ok(tree.get_path(Path::new(".gitmodules")).is_ok())
}
