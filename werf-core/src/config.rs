//! Project configuration model.
//!
//! The conveyor consumes an already-validated configuration; this module
//! only defines the shape plus a few path-shape helpers shared with the
//! stage model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WerfError};

/// Top-level project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: String,
    #[serde(default)]
    pub images: Vec<ImageSpec>,
}

/// One logical build target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,

    /// External registry reference to build from.
    #[serde(default)]
    pub from: Option<String>,
    /// Another image of this project to build from.
    #[serde(default)]
    pub from_image: Option<String>,

    #[serde(default)]
    pub before_install: Vec<String>,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub after_install: Vec<String>,
    #[serde(default)]
    pub before_setup: Vec<String>,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub after_setup: Vec<String>,

    #[serde(default)]
    pub git: Vec<GitPathSpec>,
    #[serde(default)]
    pub import: Vec<ArtifactImportSpec>,
    #[serde(default)]
    pub docker: DockerInstructionsSpec,
}

/// Resolved base image reference of an [`ImageSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseImage {
    Registry(String),
    ProjectImage(String),
}

impl ImageSpec {
    pub fn base(&self) -> Result<BaseImage> {
        match (&self.from, &self.from_image) {
            (Some(registry_ref), None) => Ok(BaseImage::Registry(registry_ref.clone())),
            (None, Some(image)) => Ok(BaseImage::ProjectImage(image.clone())),
            _ => Err(WerfError::InvalidConfig {
                reason: format!(
                    "image `{}` must set exactly one of `from` and `fromImage`",
                    self.name
                ),
            }),
        }
    }
}

/// Mapping of repository content into the image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitPathSpec {
    #[serde(default)]
    pub name: Option<String>,
    /// Remote repository url; absent means the project's own repository.
    #[serde(default)]
    pub url: Option<String>,
    /// Source base path within the repository.
    #[serde(default = "default_add")]
    pub add: String,
    /// Target path inside the image.
    pub to: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

fn default_add() -> String {
    "/".to_string()
}

impl GitPathSpec {
    /// Stable git-path name: explicit, or derived from the remote url stem,
    /// or `own` for the project repository.
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        match &self.url {
            Some(url) => {
                let stem = url.trim_end_matches('/').rsplit('/').next().unwrap_or("remote");
                stem.trim_end_matches(".git").to_string()
            }
            None => "own".to_string(),
        }
    }
}

/// Copy of paths from another image of the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactImportSpec {
    pub image: String,
    pub add: String,
    pub to: String,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

/// Final image configuration rendered as docker instruction lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerInstructionsSpec {
    #[serde(default)]
    pub volume: Vec<String>,
    #[serde(default)]
    pub expose: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub label: BTreeMap<String, String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl DockerInstructionsSpec {
    pub fn is_empty(&self) -> bool {
        self.volume.is_empty()
            && self.expose.is_empty()
            && self.env.is_empty()
            && self.label.is_empty()
            && self.cmd.is_none()
            && self.entrypoint.is_none()
            && self.workdir.is_none()
            && self.user.is_none()
    }

    /// Canonical instruction rendering. Ordering is fixed so the result is
    /// stable across runs with equal input.
    pub fn instructions(&self) -> Vec<String> {
        let mut lines = Vec::new();

        for volume in &self.volume {
            lines.push(format!("VOLUME {}", volume));
        }
        for port in &self.expose {
            lines.push(format!("EXPOSE {}", port));
        }
        for (key, value) in &self.env {
            lines.push(format!("ENV {}={}", key, value));
        }
        for (key, value) in &self.label {
            lines.push(format!("LABEL {}={}", key, value));
        }
        if let Some(workdir) = &self.workdir {
            lines.push(format!("WORKDIR {}", workdir));
        }
        if let Some(user) = &self.user {
            lines.push(format!("USER {}", user));
        }
        if let Some(entrypoint) = &self.entrypoint {
            lines.push(format!("ENTRYPOINT {}", entrypoint));
        }
        if let Some(cmd) = &self.cmd {
            lines.push(format!("CMD {}", cmd));
        }

        lines
    }
}

pub fn is_absolute_path(path: &str) -> bool {
    path.starts_with('/')
}

pub fn all_absolute_paths(paths: &[String]) -> bool {
    paths.iter().all(|p| is_absolute_path(p))
}

/// An empty list counts as all-relative.
pub fn all_relative_paths(paths: &[String]) -> bool {
    if paths.is_empty() {
        true
    } else {
        !all_absolute_paths(paths)
    }
}
