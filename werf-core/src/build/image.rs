//! Logical build target: an ordered stage chain over a base image.

use crate::config::BaseImage;
use crate::error::{Result, WerfError};
use crate::image::SharedStageImage;

use super::stage::Stage;
use super::ConveyorCtx;

pub struct Image {
    name: String,
    base: BaseImage,
    stages: Vec<Box<dyn Stage>>,
    base_image: Option<SharedStageImage>,
}

impl Image {
    pub fn new(name: impl Into<String>, base: BaseImage, stages: Vec<Box<dyn Stage>>) -> Self {
        Self { name: name.into(), base, stages, base_image: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &BaseImage {
        &self.base
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    pub fn take_stages(&mut self) -> Vec<Box<dyn Stage>> {
        std::mem::take(&mut self.stages)
    }

    pub fn set_stages(&mut self, stages: Vec<Box<dyn Stage>>) {
        self.stages = stages;
    }

    pub fn base_image(&self) -> Option<&SharedStageImage> {
        self.base_image.as_ref()
    }

    /// Stage image of the terminal stage; `None` until signatures ran or
    /// when every stage is empty.
    pub fn last_stage_image(&self) -> Option<SharedStageImage> {
        self.stages.last().and_then(|stage| stage.core().image.clone())
    }

    /// Resolve the base image handle. A project-image base must appear
    /// earlier in the topological order (`done`).
    pub fn setup_base_image(&mut self, ctx: &ConveyorCtx, done: &[Image]) -> Result<SharedStageImage> {
        let shared = match &self.base {
            BaseImage::Registry(reference) => ctx.get_or_create_stage_image(None, reference),
            BaseImage::ProjectImage(base_name) => {
                let base = done.iter().find(|image| image.name() == base_name).ok_or_else(|| {
                    WerfError::InvalidConfig {
                        reason: format!(
                            "image `{}` is based on unknown image `{}`",
                            self.name, base_name
                        ),
                    }
                })?;

                base.last_stage_image().ok_or_else(|| WerfError::InvalidConfig {
                    reason: format!(
                        "image `{}` is based on image `{}` which has no stages",
                        self.name, base_name
                    ),
                })?
            }
        };

        self.base_image = Some(shared.clone());
        Ok(shared)
    }

    /// Make sure the base image is present locally. External references are
    /// pulled once; a project-image base was produced earlier in the run.
    pub fn prepare_base_image(&self, ctx: &ConveyorCtx) -> Result<()> {
        let base = self.base_image.as_ref().ok_or_else(|| WerfError::InvalidConfig {
            reason: format!("base image of `{}` is not resolved", self.name),
        })?;

        if let BaseImage::Registry(reference) = &self.base {
            let mut base = base.borrow_mut();
            if !base.is_exists() {
                base.pull(ctx.runtime.as_ref())?;
                if !base.is_exists() {
                    return Err(WerfError::docker(format!(
                        "base image {} is not available after pull",
                        reference
                    )));
                }
            }
        }

        Ok(())
    }
}
