//! User command stages: before-install through after-setup.

use crate::build::ConveyorCtx;
use crate::error::Result;
use crate::image::SharedStageImage;

use super::{Stage, StageCore, StageName};

/// Stage executing a user-configured shell command list.
pub struct UserCommandStage {
    core: StageCore,
    kind: StageName,
    commands: Vec<String>,
}

impl UserCommandStage {
    pub fn new(image_name: &str, kind: StageName, commands: Vec<String>) -> Self {
        debug_assert!(matches!(
            kind,
            StageName::BeforeInstall
                | StageName::Install
                | StageName::AfterInstall
                | StageName::BeforeSetup
                | StageName::Setup
                | StageName::AfterSetup
        ));

        Self { core: StageCore::new(image_name), kind, commands }
    }
}

impl Stage for UserCommandStage {
    fn name(&self) -> StageName {
        self.kind
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn is_empty(&self, _ctx: &ConveyorCtx, _prev_built: Option<&SharedStageImage>) -> Result<bool> {
        Ok(self.commands.is_empty())
    }

    fn dependencies(&self, _ctx: &ConveyorCtx, _prev_image: &SharedStageImage) -> Result<String> {
        Ok(self.commands.join("\n"))
    }

    fn prepare_image(
        &self,
        _ctx: &ConveyorCtx,
        _prev_built: Option<&SharedStageImage>,
        target: &SharedStageImage,
    ) -> Result<()> {
        target.borrow_mut().mutations.add_commands(self.commands.iter().cloned());
        Ok(())
    }
}
