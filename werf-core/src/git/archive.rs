//! Tar archive production from a prepared work tree.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::checksum::collect_files;
use super::PathFilter;
use crate::error::{Result, WerfError};

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub commit: String,
    pub base_path: String,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveDescriptor {
    pub is_empty: bool,
    pub entry_count: usize,
}

/// Temp-file-backed tar of a commit tree under the path filter. Entry names
/// are relative to the filter's base path.
#[derive(Debug)]
pub struct Archive {
    file: tempfile::NamedTempFile,
    pub descriptor: ArchiveDescriptor,
}

impl Archive {
    pub fn path(&self) -> &Path {
        self.file.path()
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

pub(crate) fn create_archive_from_work_tree(
    work_tree: &Path,
    repo_name: &str,
    opts: &ArchiveOptions,
) -> Result<Archive> {
    let filter = PathFilter::new(&opts.base_path, &opts.include_paths, &opts.exclude_paths)?;

    let mut paths = Vec::new();
    collect_files(work_tree, work_tree, &mut |rel| {
        if filter.is_path_matched(rel) {
            paths.push(rel.to_string());
        }
    })?;
    paths.sort();

    let file = tempfile::Builder::new()
        .prefix("werf-archive-")
        .suffix(".tar")
        .tempfile()
        .map_err(|e| WerfError::io(std::env::temp_dir(), e))?;

    let writer = file.reopen().map_err(|e| WerfError::io(file.path().to_path_buf(), e))?;
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for rel in &paths {
        let entry_name = filter.strip_base(rel).unwrap_or(rel.as_str());
        let full = work_tree.join(rel);
        builder
            .append_path_with_name(&full, entry_name)
            .map_err(|e| WerfError::io(&full, e))?;
    }

    let writer = builder
        .into_inner()
        .map_err(|e| WerfError::io(file.path().to_path_buf(), e))?;
    writer.sync_all().map_err(|e| WerfError::io(file.path().to_path_buf(), e))?;

    debug!("archive of commit `{}` ({} entries) for repo `{}`", opts.commit, paths.len(), repo_name);

    Ok(Archive {
        file,
        descriptor: ArchiveDescriptor { is_empty: paths.is_empty(), entry_count: paths.len() },
    })
}
