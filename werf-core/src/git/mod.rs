//! Git facade.
//!
//! Two repository kinds share one contract: [`LocalGitRepo`] (work tree at
//! the project dir) and [`RemoteGitRepo`] (bare clone cached under the werf
//! home). Stages consume the trait only: commit resolution and existence,
//! patch/archive/checksum production, submodule-aware work-tree preparation.

use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{Result, WerfError};

mod archive;
mod base;
mod checksum;
mod local;
mod patch;
mod remote;
mod work_tree;

pub use archive::{Archive, ArchiveDescriptor, ArchiveOptions};
pub use checksum::{Checksum, ChecksumOptions};
pub use local::LocalGitRepo;
pub use patch::{Patch, PatchDescriptor, PatchOptions};
pub use remote::RemoteGitRepo;

/// Contract required by git stages.
pub trait GitRepo {
    fn name(&self) -> &str;

    /// Current head commit hash.
    fn head_commit(&self) -> Result<String>;

    /// Branch name HEAD points at; `NotABranch` when detached.
    fn head_branch_name(&self) -> Result<String>;

    fn is_commit_exists(&self, commit: &str) -> Result<bool>;

    /// Breadth-first search from HEAD; first commit whose message matches
    /// the regex wins.
    fn find_commit_id_by_message(&self, regex: &str) -> Result<Option<String>>;

    fn is_empty(&self) -> Result<bool>;

    fn latest_branch_commit(&self, branch: &str) -> Result<String>;

    fn latest_tag_commit(&self, tag: &str) -> Result<String>;

    fn remote_origin_url(&self) -> Result<Option<String>>;

    fn tags_list(&self) -> Result<Vec<String>>;

    /// Branch names under `refs/remotes/origin/`, `HEAD` excluded.
    fn remote_branches_list(&self) -> Result<Vec<String>>;

    fn create_patch(&self, opts: &PatchOptions) -> Result<Patch>;

    fn create_archive(&self, opts: &ArchiveOptions) -> Result<Archive>;

    fn checksum(&self, opts: &ChecksumOptions) -> Result<Checksum>;
}

/// Include/exclude filter over repository-relative paths, with an optional
/// base path all matched paths must live under.
///
/// Patterns use doublestar semantics; a pattern naming a directory matches
/// everything beneath it.
pub struct PathFilter {
    base_path: String,
    includes: Option<GlobSet>,
    excludes: Option<GlobSet>,
}

impl PathFilter {
    pub fn new(base_path: &str, include_paths: &[String], exclude_paths: &[String]) -> Result<Self> {
        Ok(Self {
            base_path: base_path.trim_matches('/').to_string(),
            includes: build_glob_set(include_paths)?,
            excludes: build_glob_set(exclude_paths)?,
        })
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Whether a repository-relative file path passes the filter.
    pub fn is_path_matched(&self, path: &str) -> bool {
        let Some(rel) = self.strip_base(path) else { return false };

        if let Some(excludes) = &self.excludes {
            if excludes.is_match(rel) {
                return false;
            }
        }

        match &self.includes {
            None => true,
            Some(includes) => includes.is_match(rel),
        }
    }

    /// Path relative to the base path, or `None` when outside it.
    pub fn strip_base<'a>(&self, path: &'a str) -> Option<&'a str> {
        let path = path.trim_matches('/');
        if self.base_path.is_empty() {
            return Some(path);
        }

        if path == self.base_path {
            return None;
        }

        path.strip_prefix(self.base_path.as_str()).and_then(|rest| rest.strip_prefix('/'))
    }
}

fn build_glob_set(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.trim_matches('/');
        for candidate in [pattern.to_string(), format!("{}/**", pattern)] {
            let glob = GlobBuilder::new(&candidate)
                .literal_separator(true)
                .build()
                .map_err(|e| WerfError::InvalidConfig {
                    reason: format!("bad path pattern `{}`: {}", pattern, e),
                })?;
            builder.add(glob);
        }
    }

    let set = builder.build().map_err(|e| WerfError::InvalidConfig {
        reason: format!("cannot compile path patterns: {}", e),
    })?;
    Ok(Some(set))
}

/// Repository-relative path of `full` with `/` separators.
pub(crate) fn relative_path(root: &Path, full: &Path) -> Option<String> {
    full.strip_prefix(root).ok().map(|rel| {
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = PathFilter::new("", &[], &[]).unwrap();
        assert!(filter.is_path_matched("src/main.rs"));
        assert!(filter.is_path_matched("README.md"));
    }

    #[test]
    fn include_patterns_use_doublestar() {
        let filter = PathFilter::new("", &strings(&["src/**/*.go"]), &[]).unwrap();
        assert!(filter.is_path_matched("src/a/b/c.go"));
        assert!(filter.is_path_matched("src/main.go"));
        assert!(!filter.is_path_matched("pkg/main.go"));
    }

    #[test]
    fn directory_pattern_matches_contents() {
        let filter = PathFilter::new("", &strings(&["src"]), &[]).unwrap();
        assert!(filter.is_path_matched("src/deep/nested/file.txt"));
        assert!(!filter.is_path_matched("other/file.txt"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter =
            PathFilter::new("", &strings(&["src"]), &strings(&["src/vendor"])).unwrap();
        assert!(filter.is_path_matched("src/main.rs"));
        assert!(!filter.is_path_matched("src/vendor/lib.rs"));
    }

    #[test]
    fn base_path_scopes_matching() {
        let filter = PathFilter::new("backend", &strings(&["*.rs"]), &[]).unwrap();
        assert!(filter.is_path_matched("backend/main.rs"));
        assert!(!filter.is_path_matched("frontend/main.rs"));
        // `*` does not cross separators
        assert!(!filter.is_path_matched("backend/sub/main.rs"));
    }
}
