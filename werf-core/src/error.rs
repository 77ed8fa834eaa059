//! Error types for werf.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for werf operations.
pub type Result<T> = std::result::Result<T, WerfError>;

/// Main error type for werf.
#[derive(Error, Debug)]
pub enum WerfError {
    // Lock errors
    #[error("failed to acquire lock {name} within {timeout_secs} seconds")]
    LockTimeout { name: String, timeout_secs: u64 },

    #[error("lock store {path:?} cannot be initialized: {source}")]
    LockStoreInit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Git errors
    #[error("git repo `{repo}`: {message}")]
    Git { repo: String, message: String },

    #[error("cannot get branch name: HEAD refers to a specific revision that is not associated with a branch name")]
    NotABranch,

    // Container store errors
    #[error("docker: {message}")]
    Docker { message: String },

    #[error("image build failed: {message}")]
    BuildFailed { message: String },

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Publish composite (per-tag sub-errors, all tags attempted)
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Sentinel raised by the renew phase: the conveyor state is stale and
    /// must be rebuilt from configuration. Never a user-facing failure on
    /// its own; the retry driver consumes it.
    #[error("conveyor should be reset")]
    ConveyorShouldBeReset,

    #[error("conveyor was reset {0} times without converging")]
    ResetLimitReached(usize),

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WerfError {
    /// Git facade failure with the owning repo name attached.
    pub fn git(repo: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Git { repo: repo.into(), message: message.to_string() }
    }

    pub fn docker(message: impl fmt::Display) -> Self {
        Self::Docker { message: message.to_string() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Composite error returned by the publish phase after every tag has been
/// attempted. Carries one entry per failed tag operation.
#[derive(Debug)]
pub struct PublishError {
    pub failures: Vec<TagPushFailure>,
}

/// A single failed tag push inside a [`PublishError`].
#[derive(Debug)]
pub struct TagPushFailure {
    pub image: String,
    pub tag: String,
    pub message: String,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publish failed for {} tag(s):", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {}:{}: {}", failure.image, failure.tag, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PublishError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_sentinel_is_matchable() {
        let err = WerfError::ConveyorShouldBeReset;
        assert!(matches!(err, WerfError::ConveyorShouldBeReset));
    }

    #[test]
    fn publish_error_lists_every_tag() {
        let err = PublishError {
            failures: vec![
                TagPushFailure {
                    image: "frontend".into(),
                    tag: "v1".into(),
                    message: "denied".into(),
                },
                TagPushFailure {
                    image: "frontend".into(),
                    tag: "latest".into(),
                    message: "timeout".into(),
                },
            ],
        };

        let rendered = err.to_string();
        assert!(rendered.contains("frontend:v1"));
        assert!(rendered.contains("frontend:latest"));
        assert!(rendered.contains("2 tag(s)"));
    }
}
