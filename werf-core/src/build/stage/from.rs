//! Base-image setup stage.

use crate::build::ConveyorCtx;
use crate::error::Result;
use crate::image::SharedStageImage;

use super::{Stage, StageCore, StageName};

/// First stage of every image: pins the chain to the resolved base image.
pub struct FromStage {
    core: StageCore,
}

impl FromStage {
    pub fn new(image_name: &str) -> Self {
        Self { core: StageCore::new(image_name) }
    }
}

impl Stage for FromStage {
    fn name(&self) -> StageName {
        StageName::From
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn is_empty(&self, _ctx: &ConveyorCtx, _prev_built: Option<&SharedStageImage>) -> Result<bool> {
        Ok(false)
    }

    fn dependencies(&self, _ctx: &ConveyorCtx, prev_image: &SharedStageImage) -> Result<String> {
        // The base image reference is the whole input.
        Ok(prev_image.borrow().name().to_string())
    }

    fn prepare_image(
        &self,
        _ctx: &ConveyorCtx,
        _prev_built: Option<&SharedStageImage>,
        _target: &SharedStageImage,
    ) -> Result<()> {
        Ok(())
    }
}
