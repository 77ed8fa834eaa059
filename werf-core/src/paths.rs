//! Centralized path configuration for werf.
//!
//! All persisted state goes through this module so the build conveyor, the
//! git clone cache and the lock store agree on locations regardless of the
//! entry point.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Result, WerfError};

/// Bumping this invalidates every cached remote clone.
pub const REMOTE_GIT_REPO_CACHE_VERSION: u32 = 4;

/// Get the werf home directory.
///
/// Resolution order:
/// 1. `WERF_HOME` environment variable
/// 2. `~/.werf`
pub fn home_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WERF_HOME") {
        return PathBuf::from(dir);
    }

    dirs::home_dir().map(|h| h.join(".werf")).unwrap_or_else(|| PathBuf::from("/var/lib/werf"))
}

/// Backing store for the named lock manager.
pub fn locks_dir() -> PathBuf {
    home_dir().join("locks")
}

/// Per-project build directory.
pub fn project_build_dir(project: &str) -> PathBuf {
    home_dir().join("builds").join(project)
}

/// Cached bare clone location for a remote repository, keyed by endpoint
/// host and path under a cache-version-stamped parent.
pub fn remote_git_clone_path(url: &str) -> Result<PathBuf> {
    let (host, path) = endpoint_parts(url)?;
    Ok(home_dir()
        .join("git")
        .join("remote")
        .join(format!("v{}", REMOTE_GIT_REPO_CACHE_VERSION))
        .join(host)
        .join(path))
}

/// Work-tree directory for a remote repository.
pub fn remote_git_work_tree_dir(url: &str) -> Result<PathBuf> {
    let (host, path) = endpoint_parts(url)?;
    Ok(home_dir().join("git").join("work_trees").join("remote").join(host).join(path))
}

/// Work-tree directory for a local repository, keyed by a digest of its
/// filesystem path.
pub fn local_git_work_tree_dir(repo_path: &Path) -> PathBuf {
    let digest = hex_digest(repo_path.to_string_lossy().as_bytes());
    home_dir().join("git").join("work_trees").join("local").join(&digest[..16])
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Split a git endpoint url into (host, path).
///
/// Handles `scheme://[user@]host[:port]/path` and scp-like `user@host:path`.
fn endpoint_parts(url: &str) -> Result<(String, String)> {
    let invalid =
        || WerfError::InvalidConfig { reason: format!("bad git endpoint url `{}`", url) };

    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => {
            // scp-like syntax: [user@]host:path
            let rest = url.rsplit_once('@').map(|(_, r)| r).unwrap_or(url);
            let (host, path) = rest.split_once(':').ok_or_else(invalid)?;
            if host.is_empty() || path.is_empty() {
                return Err(invalid());
            }
            return Ok((host.to_string(), path.trim_matches('/').to_string()));
        }
    };

    let rest = rest.rsplit_once('@').map(|(_, r)| r).unwrap_or(rest);

    // file:// urls carry no authority; key them under localhost.
    if let Some(path) = rest.strip_prefix('/') {
        if path.is_empty() {
            return Err(invalid());
        }
        return Ok(("localhost".to_string(), path.trim_matches('/').to_string()));
    }

    let (authority, path) = rest.split_once('/').ok_or_else(invalid)?;
    let host = authority.split(':').next().unwrap_or(authority);
    if host.is_empty() || path.is_empty() {
        return Err(invalid());
    }

    Ok((host.to_string(), path.trim_matches('/').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parts_https() {
        let (host, path) = endpoint_parts("https://github.com/org/project.git").unwrap();
        assert_eq!(host, "github.com");
        assert_eq!(path, "org/project.git");
    }

    #[test]
    fn endpoint_parts_ssh_scp() {
        let (host, path) = endpoint_parts("git@github.com:org/project.git").unwrap();
        assert_eq!(host, "github.com");
        assert_eq!(path, "org/project.git");
    }

    #[test]
    fn endpoint_parts_with_port() {
        let (host, path) = endpoint_parts("ssh://git@example.com:2222/org/project").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(path, "org/project");
    }

    #[test]
    fn endpoint_parts_file_url() {
        let (host, path) = endpoint_parts("file:///var/repos/project").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(path, "var/repos/project");
    }

    #[test]
    fn endpoint_parts_rejects_garbage() {
        assert!(endpoint_parts("not a url").is_err());
    }

    #[test]
    fn remote_clone_path_is_cache_versioned() {
        std::env::set_var("WERF_HOME", "/tmp/werf-test-home");
        let path = remote_git_clone_path("https://github.com/org/project.git").unwrap();
        assert_eq!(
            path,
            PathBuf::from("/tmp/werf-test-home/git/remote/v4/github.com/org/project.git")
        );
        std::env::remove_var("WERF_HOME");
    }
}
