//! Renew phase: invalidate stage images whose git provenance is gone.
//!
//! Every existing stage image is re-checked under its lock; a stage whose
//! recorded commit no longer exists is untagged. When anything was
//! invalidated the phase returns the reset sentinel and the driver rebuilds
//! the conveyor from configuration.

use tracing::info;

use crate::error::{Result, WerfError};
use crate::lock::LockOptions;
use crate::logging;

use super::Conveyor;

pub struct RenewPhase;

impl RenewPhase {
    pub fn run(conveyor: &mut Conveyor) -> Result<()> {
        logging::log_process("Check invalid images", || Self::run_inner(conveyor))
    }

    fn run_inner(conveyor: &mut Conveyor) -> Result<()> {
        let Conveyor { ctx, images } = conveyor;
        let mut conveyor_should_be_reset = false;

        for image in images.iter() {
            let mut guards = Vec::new();

            for stage in image.stages() {
                let stage_image = stage.image();
                let (exists, name) = {
                    let stage_image = stage_image.borrow();
                    (stage_image.is_exists(), stage_image.name().to_string())
                };
                if !exists {
                    continue;
                }

                let lock_name = format!("{}.image.{}", ctx.project_name(), name);
                let guard = ctx
                    .locks
                    .acquire(&lock_name, LockOptions::with_default_timeout())
                    .map_err(|e| {
                        WerfError::docker(format!("failed to lock {}: {}", lock_name, e))
                    })?;
                guards.push(guard);

                stage_image.borrow_mut().sync_docker_state(ctx.runtime.as_ref())?;
            }

            for stage in image.stages() {
                let stage_image = stage.image();
                if !stage_image.borrow().is_exists() {
                    continue;
                }

                if stage.should_be_reset(&stage_image)? {
                    conveyor_should_be_reset = true;

                    info!(
                        "Untag {} for {}/{}",
                        stage_image.borrow().name(),
                        image.name(),
                        stage.name()
                    );
                    stage_image.borrow_mut().untag(ctx.runtime.as_ref())?;
                }
            }

            drop(guards);
        }

        if conveyor_should_be_reset {
            Err(WerfError::ConveyorShouldBeReset)
        } else {
            Ok(())
        }
    }
}
