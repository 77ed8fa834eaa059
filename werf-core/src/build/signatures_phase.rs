//! Signatures phase: compute the deterministic signature chain of every
//! image and attach stage images through the shared handle map. Read-only
//! with respect to the container store apart from state refresh.

use crate::error::{Result, WerfError};
use crate::image::SharedStageImage;
use crate::logging;

use super::stage::Stage;
use super::{stage_signature, Conveyor, ConveyorCtx, Image};

pub struct SignaturesPhase;

impl SignaturesPhase {
    pub fn run(conveyor: &mut Conveyor) -> Result<()> {
        let Conveyor { ctx, images } = conveyor;

        for idx in 0..images.len() {
            let (done, rest) = images.split_at_mut(idx);
            let image = &mut rest[0];

            logging::log_service_process(
                &format!("Calculate {} signatures", image.name()),
                || calculate_image_signatures(ctx, done, image),
            )?;
        }

        Ok(())
    }
}

fn calculate_image_signatures(
    ctx: &ConveyorCtx,
    done: &[Image],
    image: &mut Image,
) -> Result<()> {
    let base_image = image.setup_base_image(ctx, done)?;
    base_image.borrow_mut().sync_docker_state(ctx.runtime.as_ref())?;

    let mut prev_image = base_image;
    let mut prev_built: Option<SharedStageImage> = None;
    let mut prev_signature: Option<String> = None;
    let mut kept: Vec<Box<dyn Stage>> = Vec::new();

    for mut stage in image.take_stages() {
        if prev_image.borrow().is_exists() {
            prev_built = Some(prev_image.clone());
        }

        let is_empty = stage.is_empty(ctx, prev_built.as_ref()).map_err(|e| {
            WerfError::BuildFailed {
                message: format!("error checking stage {} is empty: {}", stage.name(), e),
            }
        })?;
        if is_empty {
            logging::log_service_state(stage.name().as_str(), "-");
            continue;
        }

        let dependencies = stage.dependencies(ctx, &prev_image)?;
        let signature = stage_signature(&dependencies, prev_signature.as_deref());
        stage.core_mut().signature = Some(signature.clone());

        let image_name = ctx.stage_image_name(&signature);
        logging::log_service_state(stage.name().as_str(), &image_name);

        let from_image = prev_image.borrow().name().to_string();
        let stage_image = ctx.get_or_create_stage_image(Some(from_image), &image_name);
        stage.core_mut().image = Some(stage_image.clone());

        stage_image.borrow_mut().sync_docker_state(ctx.runtime.as_ref()).map_err(|e| {
            WerfError::docker(format!(
                "error synchronizing docker state of stage {}: {}",
                stage.name(),
                e
            ))
        })?;
        stage.after_image_sync_hook(ctx)?;

        kept.push(stage);
        prev_signature = Some(signature);
        prev_image = stage_image;
    }

    image.set_stages(kept);
    ctx.set_image_signature(image.name(), prev_signature);

    Ok(())
}
