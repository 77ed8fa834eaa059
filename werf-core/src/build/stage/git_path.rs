//! Git path: a mapping of repository content into the image.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use sha2::{Digest, Sha256};

use crate::build::ConveyorCtx;
use crate::error::{Result, WerfError};
use crate::git::{Archive, ArchiveOptions, Checksum, ChecksumOptions, GitRepo, Patch, PatchOptions};

/// Binds stage signatures to git state and produces the patch/archive
/// artifacts applied during stage builds.
pub struct GitPath {
    pub name: String,
    pub repo: Rc<dyn GitRepo>,
    /// Source base path within the repository.
    pub add: String,
    /// Target path inside the image.
    pub to: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub commit: Option<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
}

impl GitPath {
    /// Image label carrying the commit this path was built from.
    pub fn commit_label_key(&self) -> String {
        let sanitized: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("werf-git-{}-commit", sanitized)
    }

    /// Commit the path is pinned to, or the repo head.
    pub fn resolve_commit(&self) -> Result<String> {
        if let Some(commit) = &self.commit {
            if !self.repo.is_commit_exists(commit)? {
                return Err(WerfError::git(
                    self.repo.name(),
                    format!("unknown commit `{}`", commit),
                ));
            }
            return Ok(commit.clone());
        }

        if let Some(tag) = &self.tag {
            return self.repo.latest_tag_commit(tag);
        }

        if let Some(branch) = &self.branch {
            return self.repo.latest_branch_commit(branch);
        }

        self.repo.head_commit()
    }

    pub fn commit_from_image_labels(&self, labels: &BTreeMap<String, String>) -> Option<String> {
        labels.get(&self.commit_label_key()).cloned()
    }

    /// Digest of the mapping parameters (everything except repository
    /// content).
    pub fn params_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.name, &self.add, &self.to] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        for part in [&self.branch, &self.tag, &self.commit] {
            hasher.update(part.as_deref().unwrap_or_default().as_bytes());
            hasher.update([0u8]);
        }
        for pattern in self.include_paths.iter().chain(&self.exclude_paths) {
            hasher.update(pattern.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    fn base_path(&self) -> String {
        self.add.trim_matches('/').to_string()
    }

    /// Deterministic checksum of the mapped content at `commit`.
    pub fn content_checksum(&self, commit: &str) -> Result<Checksum> {
        let paths = if self.include_paths.is_empty() {
            vec!["**/*".to_string()]
        } else {
            self.include_paths.clone()
        };

        self.repo.checksum(&ChecksumOptions {
            commit: commit.to_string(),
            base_path: self.base_path(),
            paths,
            include_paths: self.include_paths.clone(),
            exclude_paths: self.exclude_paths.clone(),
        })
    }

    /// Archive of the mapped content at `commit`, persisted into the run's
    /// tmp dir; returns the host path, or `None` when nothing matched.
    pub fn assemble_archive(&self, ctx: &ConveyorCtx, commit: &str) -> Result<Option<PathBuf>> {
        let archive: Archive = self.repo.create_archive(&ArchiveOptions {
            commit: commit.to_string(),
            base_path: self.base_path(),
            include_paths: self.include_paths.clone(),
            exclude_paths: self.exclude_paths.clone(),
        })?;

        if archive.descriptor.is_empty {
            return Ok(None);
        }

        let file_name = format!("archive-{}-{}.tar", self.name, uuid::Uuid::new_v4());
        archive.persist_into(ctx.tmp_dir(), &file_name).map(Some)
    }

    /// Patch between two commits of the mapped content, persisted into the
    /// run's tmp dir; returns the host path, or `None` when empty.
    pub fn assemble_patch(
        &self,
        ctx: &ConveyorCtx,
        from_commit: &str,
        to_commit: &str,
    ) -> Result<Option<PathBuf>> {
        let patch: Patch = self.repo.create_patch(&PatchOptions {
            from_commit: from_commit.to_string(),
            to_commit: to_commit.to_string(),
            base_path: self.base_path(),
            include_paths: self.include_paths.clone(),
            exclude_paths: self.exclude_paths.clone(),
            with_entire_file_context: false,
            with_binary: true,
        })?;

        if patch.is_empty() {
            return Ok(None);
        }

        let file_name = format!("patch-{}-{}.patch", self.name, uuid::Uuid::new_v4());
        patch.persist_into(ctx.tmp_dir(), &file_name).map(Some)
    }
}
