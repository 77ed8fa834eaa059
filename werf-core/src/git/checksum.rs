//! Deterministic content checksum over a prepared work tree.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use globset::GlobBuilder;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{relative_path, PathFilter};
use crate::error::{Result, WerfError};

#[derive(Debug, Clone)]
pub struct ChecksumOptions {
    pub commit: String,
    /// Base path all patterns and filters are rooted at.
    pub base_path: String,
    /// Patterns selecting the paths to hash.
    pub paths: Vec<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
}

/// Result of a checksum calculation.
#[derive(Debug, Clone)]
pub struct Checksum {
    digest: String,
    /// Patterns that matched no file. Recorded, not fatal.
    pub no_match_paths: Vec<String>,
}

impl Checksum {
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

fn debug_checksum() -> bool {
    std::env::var("WERF_DEBUG_GIT_REPO_CHECKSUM").as_deref() == Ok("1")
}

/// Hash the filtered, sorted set of matched paths. For each path the path
/// string, the octal mode, regular-file content and symlink targets
/// contribute; directories expand recursively.
pub(crate) fn checksum_work_tree(work_tree: &Path, opts: &ChecksumOptions) -> Result<Checksum> {
    let filter = PathFilter::new(&opts.base_path, &opts.include_paths, &opts.exclude_paths)?;

    let mut matched: BTreeSet<String> = BTreeSet::new();
    let mut no_match_paths = Vec::new();

    for pattern in &opts.paths {
        let rooted = join_pattern(filter.base_path(), pattern);
        let paths = files_matching_pattern(work_tree, &rooted)?;

        if paths.is_empty() {
            if debug_checksum() {
                debug!("ignore checksum path pattern `{}`: no matches found", pattern);
            }
            no_match_paths.push(pattern.clone());
        }

        matched.extend(paths);
    }

    let mut hasher = Sha256::new();

    for path in &matched {
        if !filter.is_path_matched(path) {
            if debug_checksum() {
                debug!("excluded file `{}` from resulting checksum by path filter", path);
            }
            continue;
        }

        let full_path = work_tree.join(path);
        hasher.update(path.as_bytes());

        // file should exist after being scanned
        let meta = fs::symlink_metadata(&full_path).map_err(|e| WerfError::io(&full_path, e))?;
        hasher.update(format!("{:o}", file_mode(&meta)).as_bytes());

        if meta.file_type().is_file() {
            let mut file = fs::File::open(&full_path).map_err(|e| WerfError::io(&full_path, e))?;
            io::copy(&mut file, &mut hasher).map_err(|e| WerfError::io(&full_path, e))?;

            if debug_checksum() {
                debug!("added file `{}` to resulting checksum", path);
            }
        } else if meta.file_type().is_symlink() {
            let target = fs::read_link(&full_path).map_err(|e| WerfError::io(&full_path, e))?;
            hasher.update(target.to_string_lossy().as_bytes());

            if debug_checksum() {
                debug!("added symlink `{}` -> `{}` to resulting checksum", path, target.display());
            }
        }
    }

    let checksum = Checksum { digest: format!("{:x}", hasher.finalize()), no_match_paths };

    if debug_checksum() {
        debug!("calculated checksum {}", checksum.digest());
    }

    Ok(checksum)
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o40755
    } else {
        0o100644
    }
}

fn join_pattern(base: &str, pattern: &str) -> String {
    let pattern = pattern.trim_matches('/');
    if base.is_empty() {
        pattern.to_string()
    } else if pattern.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, pattern)
    }
}

/// Regular files and symlinks whose work-tree-relative path matches the
/// pattern, directly or through a matched ancestor directory.
pub(crate) fn files_matching_pattern(work_tree: &Path, pattern: &str) -> Result<Vec<String>> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| WerfError::InvalidConfig {
            reason: format!("bad path pattern `{}`: {}", pattern, e),
        })?
        .compile_matcher();

    let mut paths = Vec::new();
    collect_files(work_tree, work_tree, &mut |rel| {
        if matches_with_ancestors(&matcher, rel) {
            paths.push(rel.to_string());
        }
    })?;

    Ok(paths)
}

/// All regular files and symlinks beneath the work tree, `.git` excluded.
pub(crate) fn collect_files(
    root: &Path,
    dir: &Path,
    visit: &mut impl FnMut(&str),
) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| WerfError::io(dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| WerfError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| WerfError::io(&path, e))?;

        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            collect_files(root, &path, visit)?;
        } else if file_type.is_file() || file_type.is_symlink() {
            if let Some(rel) = relative_path(root, &path) {
                visit(&rel);
            }
        }
    }

    Ok(())
}

fn matches_with_ancestors(matcher: &globset::GlobMatcher, rel: &str) -> bool {
    if matcher.is_match(rel) {
        return true;
    }

    let mut current = rel;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        if matcher.is_match(current) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn opts(paths: &[&str]) -> ChecksumOptions {
        ChecksumOptions {
            commit: String::new(),
            base_path: String::new(),
            paths: paths.iter().map(|s| s.to_string()).collect(),
            include_paths: vec![],
            exclude_paths: vec![],
        }
    }

    #[test]
    fn checksum_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.go", "package main");
        write(dir.path(), "README.md", "# demo");

        let a = checksum_work_tree(dir.path(), &opts(&["src/**/*.go", "README.md"])).unwrap();
        let b = checksum_work_tree(dir.path(), &opts(&["src/**/*.go", "README.md"])).unwrap();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn checksum_independent_of_pattern_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.go", "package main");
        write(dir.path(), "README.md", "# demo");

        let a = checksum_work_tree(dir.path(), &opts(&["src/**/*.go", "README.md"])).unwrap();
        let b = checksum_work_tree(dir.path(), &opts(&["README.md", "src/**/*.go"])).unwrap();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn renaming_a_file_changes_the_checksum() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/one.go", "package main");
        let before = checksum_work_tree(dir.path(), &opts(&["src"])).unwrap();

        fs::rename(dir.path().join("src/one.go"), dir.path().join("src/two.go")).unwrap();
        let after = checksum_work_tree(dir.path(), &opts(&["src"])).unwrap();

        assert_ne!(before.digest(), after.digest());
    }

    #[cfg(unix)]
    #[test]
    fn mode_change_changes_the_checksum() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "run.sh", "#!/bin/sh");
        let script = dir.path().join("run.sh");

        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        let before = checksum_work_tree(dir.path(), &opts(&["run.sh"])).unwrap();

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let after = checksum_work_tree(dir.path(), &opts(&["run.sh"])).unwrap();

        assert_ne!(before.digest(), after.digest());
    }

    #[test]
    fn unmatched_patterns_are_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", "# demo");

        let result =
            checksum_work_tree(dir.path(), &opts(&["README.md", "missing/**/*.c"])).unwrap();
        assert_eq!(result.no_match_paths, vec!["missing/**/*.c".to_string()]);
    }

    #[test]
    fn directory_pattern_expands_recursively() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a/deep/file.txt", "x");
        write(dir.path(), "src/b.txt", "y");

        let paths = files_matching_pattern(dir.path(), "src").unwrap();
        assert_eq!(paths.len(), 2);
    }
}
