//! Prepare-images phase: resolve base images and configure the build
//! instructions of every stage image that still has to be built.

use crate::error::{Result, WerfError};
use crate::image::SharedStageImage;
use crate::logging;

use super::{Conveyor, ConveyorCtx, Image};
use crate::VERSION;

pub const WERF_CACHE_VERSION_LABEL: &str = "werf-cache-version";

pub struct PrepareImagesPhase;

impl PrepareImagesPhase {
    pub fn run(conveyor: &mut Conveyor) -> Result<()> {
        logging::log_process("Prepare build instructions for images", || {
            let Conveyor { ctx, images } = conveyor;
            for image in images.iter() {
                prepare_image_stages(ctx, image)?;
            }
            Ok(())
        })
    }
}

fn prepare_image_stages(ctx: &ConveyorCtx, image: &Image) -> Result<()> {
    image.prepare_base_image(ctx).map_err(|e| {
        WerfError::docker(format!("error preparing base image of image {}: {}", image.name(), e))
    })?;

    let mut prev_image = image
        .base_image()
        .cloned()
        .ok_or_else(|| WerfError::InvalidConfig {
            reason: format!("base image of `{}` is not resolved", image.name()),
        })?;
    let mut prev_built: Option<SharedStageImage> = None;

    let stage_count = image.stages().len();
    for (index, stage) in image.stages().iter().enumerate() {
        if prev_image.borrow().is_exists() {
            prev_built = Some(prev_image.clone());
        }

        let stage_image = stage.image();
        let signature = stage.signature();

        if ctx.is_signature_prepared(&signature) || stage_image.borrow().is_exists() {
            prev_image = stage_image;
            continue;
        }

        let is_terminal = index + 1 == stage_count;
        {
            let mut target = stage_image.borrow_mut();
            target.mutations.add_label([
                ("werf".to_string(), ctx.project_name().to_string()),
                ("werf-version".to_string(), VERSION.to_string()),
                (WERF_CACHE_VERSION_LABEL.to_string(), super::BUILD_CACHE_VERSION.to_string()),
                ("werf-image".to_string(), is_terminal.to_string()),
                ("werf-dev-mode".to_string(), "false".to_string()),
            ]);

            if let Some(sock) = ctx.ssh_auth_sock() {
                target
                    .mutations
                    .add_volume(format!("{}:/tmp/werf-ssh-agent", sock.display()));
                target.mutations.add_env([(
                    "SSH_AUTH_SOCK".to_string(),
                    "/tmp/werf-ssh-agent".to_string(),
                )]);
            }
        }

        stage.prepare_image(ctx, prev_built.as_ref(), &stage_image).map_err(|e| {
            WerfError::BuildFailed {
                message: format!("error preparing stage {}: {}", stage.name(), e),
            }
        })?;

        ctx.mark_signature_prepared(&signature, stage_image.clone());
        prev_image = stage_image;
    }

    Ok(())
}
