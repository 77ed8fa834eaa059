//! werf core library.
//!
//! Cache-aware container image build conveyor: deterministic stage
//! signatures, cross-process lock management, git-bound invalidation and
//! registry publish with tag bookkeeping.

pub mod build;
pub mod config;
pub mod error;
pub mod git;
pub mod image;
pub mod lock;
pub mod logging;
pub mod paths;
pub mod runtime;
pub mod tmp;
pub mod toolchain;

/// Tool version stamped onto every built stage image.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used items
pub use build::{
    run_build, run_build_and_publish, Collaborators, Conveyor, PublishOptions, BUILD_CACHE_VERSION,
    MAX_CONVEYOR_RESETS,
};
pub use config::ProjectConfig;
pub use error::{Result, WerfError};
pub use lock::{LockManager, LockOptions, DEFAULT_LOCK_TIMEOUT};
pub use runtime::{BuildOptions, ContainerRuntime, DockerCliRuntime};
pub use tmp::ProjectTmpDir;
