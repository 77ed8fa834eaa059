//! Stage model.
//!
//! A stage is a deterministic, cacheable unit of image construction. The
//! kind set is closed; every kind implements [`Stage`] over a shared
//! [`StageCore`] holding the owning image name, the computed signature and
//! the attached stage image.

use std::fmt;

use crate::build::ConveyorCtx;
use crate::error::Result;
use crate::image::SharedStageImage;

mod docker_instructions;
mod from;
mod git;
mod git_path;
mod imports;
mod user;

pub use docker_instructions::DockerInstructionsStage;
pub use from::FromStage;
pub use git::{GitArchiveStage, GitLatestPatchStage};
pub use git_path::GitPath;
pub use imports::ArtifactImportsStage;
pub use user::UserCommandStage;

/// Stage kinds in canonical order within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    From,
    BeforeInstall,
    GitArchive,
    Install,
    AfterInstall,
    BeforeSetup,
    Setup,
    AfterSetup,
    ArtifactImports,
    GitLatestPatch,
    DockerInstructions,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::From => "from",
            StageName::BeforeInstall => "before_install",
            StageName::GitArchive => "git_archive",
            StageName::Install => "install",
            StageName::AfterInstall => "after_install",
            StageName::BeforeSetup => "before_setup",
            StageName::Setup => "setup",
            StageName::AfterSetup => "after_setup",
            StageName::ArtifactImports => "artifact_imports",
            StageName::GitLatestPatch => "git_latest_patch",
            StageName::DockerInstructions => "docker_instructions",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared by every stage kind.
#[derive(Debug, Default)]
pub struct StageCore {
    pub image_name: String,
    pub signature: Option<String>,
    pub image: Option<SharedStageImage>,
}

impl StageCore {
    pub fn new(image_name: impl Into<String>) -> Self {
        Self { image_name: image_name.into(), signature: None, image: None }
    }
}

/// Capability set shared by the closed set of stage kinds.
pub trait Stage {
    fn name(&self) -> StageName;

    fn core(&self) -> &StageCore;

    fn core_mut(&mut self) -> &mut StageCore;

    /// Empty stages are dropped from the image before signature chaining.
    fn is_empty(&self, ctx: &ConveyorCtx, prev_built: Option<&SharedStageImage>) -> Result<bool>;

    /// Canonical serialization of every input that affects output bytes.
    /// Must be stable across runs given equal inputs.
    fn dependencies(&self, ctx: &ConveyorCtx, prev_image: &SharedStageImage) -> Result<String>;

    /// Called immediately before the stage build; may assemble side-effect
    /// artifacts (patches, archives, exports) needed at build time.
    fn pre_run_hook(&self, _ctx: &ConveyorCtx) -> Result<()> {
        Ok(())
    }

    /// Configure labels/volumes/env/commands on the target stage image.
    fn prepare_image(
        &self,
        ctx: &ConveyorCtx,
        prev_built: Option<&SharedStageImage>,
        target: &SharedStageImage,
    ) -> Result<()>;

    /// Whether the built image must be invalidated because its provenance
    /// is gone.
    fn should_be_reset(&self, _built: &SharedStageImage) -> Result<bool> {
        Ok(false)
    }

    /// Called after the stage image state was refreshed from the daemon.
    fn after_image_sync_hook(&self, _ctx: &ConveyorCtx) -> Result<()> {
        Ok(())
    }

    /// Signature assigned by the signatures phase.
    fn signature(&self) -> String {
        self.core().signature.clone().expect("stage signature is set by the signatures phase")
    }

    /// Stage image attached by the signatures phase.
    fn image(&self) -> SharedStageImage {
        self.core().image.clone().expect("stage image is attached by the signatures phase")
    }
}
