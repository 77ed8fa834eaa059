//! Patch production between two commits.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use git2::{DiffFormat, DiffOptions, Repository};

use super::PathFilter;
use crate::error::{Result, WerfError};

#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub from_commit: String,
    pub to_commit: String,
    pub base_path: String,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    /// Emit hunks with the whole file as context.
    pub with_entire_file_context: bool,
    /// Include binary deltas in the patch body.
    pub with_binary: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PatchDescriptor {
    /// Paths touched by the patch, filter applied.
    pub paths: Vec<String>,
    /// Whether any touched delta is binary.
    pub binary: bool,
}

/// Temp-file-backed patch. The file lives as long as the handle, or until
/// [`Patch::persist_into`] moves it under a caller-owned directory.
#[derive(Debug)]
pub struct Patch {
    file: tempfile::NamedTempFile,
    pub descriptor: PatchDescriptor,
}

impl Patch {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptor.paths.is_empty()
    }

    /// Move the backing file into `dir`, transferring ownership of cleanup.
    pub fn persist_into(self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let dest = dir.join(file_name);
        self.file
            .persist(&dest)
            .map_err(|e| WerfError::io(&dest, e.error))?;
        Ok(dest)
    }
}

pub(crate) fn create_patch(
    repo: &Repository,
    repo_name: &str,
    opts: &PatchOptions,
) -> Result<Patch> {
    let from = super::base::resolve_commit(repo, repo_name, &opts.from_commit)
        .map_err(|e| WerfError::git(repo_name, format!("bad `from` commit: {}", e)))?;
    let to = super::base::resolve_commit(repo, repo_name, &opts.to_commit)
        .map_err(|e| WerfError::git(repo_name, format!("bad `to` commit: {}", e)))?;

    let from_tree = from.tree().map_err(|e| {
        WerfError::git(repo_name, format!("cannot read tree of `{}`: {}", from.id(), e.message()))
    })?;
    let to_tree = to.tree().map_err(|e| {
        WerfError::git(repo_name, format!("cannot read tree of `{}`: {}", to.id(), e.message()))
    })?;

    let mut diff_opts = DiffOptions::new();
    if opts.with_entire_file_context {
        diff_opts.context_lines(0x0fff_ffff);
    }
    if opts.with_binary {
        diff_opts.show_binary(true);
    }

    let diff = repo
        .diff_tree_to_tree(Some(&from_tree), Some(&to_tree), Some(&mut diff_opts))
        .map_err(|e| {
            WerfError::git(
                repo_name,
                format!(
                    "error creating patch between `{}` and `{}` commits: {}",
                    opts.from_commit,
                    opts.to_commit,
                    e.message()
                ),
            )
        })?;

    let filter = PathFilter::new(&opts.base_path, &opts.include_paths, &opts.exclude_paths)?;

    let mut body: Vec<u8> = Vec::new();
    let mut paths: BTreeSet<String> = BTreeSet::new();
    let mut binary = false;

    diff.print(DiffFormat::Patch, |delta, _hunk, line| {
        let path = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(|p| p.to_string_lossy().replace('\\', "/"));
        let Some(path) = path else { return true };

        if !filter.is_path_matched(&path) {
            return true;
        }

        paths.insert(path);
        binary |= delta.flags().is_binary();

        match line.origin() {
            '+' | '-' | ' ' => body.push(line.origin() as u8),
            _ => {}
        }
        body.extend_from_slice(line.content());
        true
    })
    .map_err(|e| {
        WerfError::git(
            repo_name,
            format!(
                "error creating patch between `{}` and `{}` commits: {}",
                opts.from_commit,
                opts.to_commit,
                e.message()
            ),
        )
    })?;

    let mut file = tempfile::Builder::new()
        .prefix("werf-patch-")
        .suffix(".patch")
        .tempfile()
        .map_err(|e| WerfError::io(std::env::temp_dir(), e))?;
    file.write_all(&body).map_err(|e| WerfError::io(file.path().to_path_buf(), e))?;
    file.flush().map_err(|e| WerfError::io(file.path().to_path_buf(), e))?;

    Ok(Patch { file, descriptor: PatchDescriptor { paths: paths.into_iter().collect(), binary } })
}
