//! Publish phase: re-tag terminal stage images under the destination
//! repository, push and untag. Per-tag operations are serialized; every tag
//! is attempted and failures are reported as one composite error.

use std::collections::HashSet;

use crate::error::{PublishError, Result, TagPushFailure, WerfError};
use crate::image::SharedStageImage;
use crate::logging;

use super::{Conveyor, ConveyorCtx};

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Destination repository.
    pub repo: String,
    /// Tags to publish every image under.
    pub tags: Vec<String>,
    /// Also push every intermediate stage image as cache.
    pub with_stages: bool,
}

pub struct PublishPhase {
    opts: PublishOptions,
}

impl PublishPhase {
    pub fn new(opts: PublishOptions) -> Self {
        Self { opts }
    }

    pub fn run(&self, conveyor: &mut Conveyor) -> Result<()> {
        logging::log_process("Publish images", || self.run_inner(conveyor))
    }

    fn run_inner(&self, conveyor: &mut Conveyor) -> Result<()> {
        let Conveyor { ctx, images } = conveyor;

        let mut failures: Vec<TagPushFailure> = Vec::new();
        let mut pushed_stage_signatures: HashSet<String> = HashSet::new();

        for image in images.iter() {
            let Some(terminal) = image.last_stage_image() else { continue };
            if !terminal.borrow().is_exists() {
                return Err(WerfError::docker(format!(
                    "image {} stages are not built yet",
                    image.name()
                )));
            }

            if self.opts.with_stages {
                for stage in image.stages() {
                    let signature = stage.signature();
                    if !pushed_stage_signatures.insert(signature.clone()) {
                        continue;
                    }

                    let stage_tag = format!("image-stage-{}", signature);
                    let target = format!("{}:{}", self.opts.repo, stage_tag);
                    if let Err(e) = push_as(ctx, &stage.image(), &target) {
                        failures.push(TagPushFailure {
                            image: image.name().to_string(),
                            tag: stage_tag,
                            message: e.to_string(),
                        });
                    }
                }
            }

            for tag in &self.opts.tags {
                let target = format!("{}/{}:{}", self.opts.repo, image.name(), tag);
                let result = logging::log_process(&format!("Publish {}", target), || {
                    push_as(ctx, &terminal, &target)
                });

                if let Err(e) = result {
                    failures.push(TagPushFailure {
                        image: image.name().to_string(),
                        tag: tag.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PublishError { failures }.into())
        }
    }
}

/// Tag, push and untag one destination reference. The temporary tag is
/// removed even when the push fails.
fn push_as(ctx: &ConveyorCtx, image: &SharedStageImage, target: &str) -> Result<()> {
    image.borrow().tag_as(ctx.runtime.as_ref(), target)?;

    let push_result = ctx.runtime.push(target);
    let untag_result = ctx.runtime.untag(target);

    push_result?;
    untag_result
}
