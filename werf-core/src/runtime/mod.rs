//! Container store adapter.
//!
//! The conveyor treats every per-stage image operation as opaque behind
//! [`ContainerRuntime`]; the shipped implementation shells out to the docker
//! CLI, tests substitute an in-memory fake.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

mod docker;

pub use docker::DockerCliRuntime;

/// Inspect info of an image present in the local store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageInspect {
    pub id: String,
    pub size: u64,
    pub created: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Options forwarded to the backend for every stage build of a run.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub no_cache: bool,
    pub platform: Option<String>,
}

/// Accumulated description of one stage build, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct BuildSpec {
    /// Image to start the build container from.
    pub from_image: Option<String>,
    /// Labels committed onto the result.
    pub labels: BTreeMap<String, String>,
    /// Environment for the build container.
    pub env: BTreeMap<String, String>,
    /// Host volumes for the build container (`host:container[:mode]`).
    pub volumes: Vec<String>,
    /// Service containers whose volumes are mounted into the build container.
    pub volumes_from: Vec<String>,
    /// Shell commands run inside the build container.
    pub commands: Vec<String>,
    /// Raw instruction lines committed onto the result (final image config).
    pub commit_instructions: Vec<String>,
}

/// Container-image lifecycle contract consumed by the conveyor.
pub trait ContainerRuntime {
    fn image_exists(&self, name: &str) -> Result<bool>;

    /// `None` when the image is not present locally.
    fn image_inspect(&self, name: &str) -> Result<Option<ImageInspect>>;

    /// Run the described build and return the resulting image id. The result
    /// is unnamed until [`ContainerRuntime::tag`] is applied.
    fn build(&self, spec: &BuildSpec, opts: &BuildOptions) -> Result<String>;

    fn tag(&self, source: &str, target: &str) -> Result<()>;

    fn untag(&self, name: &str) -> Result<()>;

    fn push(&self, name: &str) -> Result<()>;

    fn pull(&self, name: &str) -> Result<()>;

    /// Copy a path out of an image into a host directory.
    fn export_from_image(&self, image: &str, path: &str, dest_dir: &Path) -> Result<()>;

    /// Create the named service container from `image` unless it already
    /// exists. Used for tool containers mounted via volumes-from.
    fn ensure_service_container(&self, name: &str, image: &str) -> Result<()>;
}

/// Docker config directory resolution honoring `WERF_DOCKER_CONFIG`.
pub fn docker_config_dir() -> Option<PathBuf> {
    std::env::var_os("WERF_DOCKER_CONFIG").map(PathBuf::from)
}
