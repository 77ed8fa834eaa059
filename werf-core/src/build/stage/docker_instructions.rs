//! Final image configuration rendered as docker instructions.

use crate::build::ConveyorCtx;
use crate::config::DockerInstructionsSpec;
use crate::error::Result;
use crate::image::SharedStageImage;

use super::{Stage, StageCore, StageName};

pub struct DockerInstructionsStage {
    core: StageCore,
    spec: DockerInstructionsSpec,
}

impl DockerInstructionsStage {
    pub fn new(image_name: &str, spec: DockerInstructionsSpec) -> Self {
        Self { core: StageCore::new(image_name), spec }
    }
}

impl Stage for DockerInstructionsStage {
    fn name(&self) -> StageName {
        StageName::DockerInstructions
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn is_empty(&self, _ctx: &ConveyorCtx, _prev_built: Option<&SharedStageImage>) -> Result<bool> {
        Ok(self.spec.is_empty())
    }

    fn dependencies(&self, _ctx: &ConveyorCtx, _prev_image: &SharedStageImage) -> Result<String> {
        Ok(self.spec.instructions().join("\n"))
    }

    fn prepare_image(
        &self,
        _ctx: &ConveyorCtx,
        _prev_built: Option<&SharedStageImage>,
        target: &SharedStageImage,
    ) -> Result<()> {
        let mut target = target.borrow_mut();
        for instruction in self.spec.instructions() {
            target.mutations.add_commit_instruction(instruction);
        }
        Ok(())
    }
}
