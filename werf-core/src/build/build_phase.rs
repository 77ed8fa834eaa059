//! Build phase: two passes per image.
//!
//! The lock pass takes the per-stage lock for every stage image that does
//! not exist yet and refreshes its state once more, so a stage built by a
//! cooperating process in the meantime is simply skipped. The build pass
//! then builds the remaining stages in order, releasing each stage's lock
//! right after its build completes; guards dropped on error paths release
//! whatever is still held.

use std::collections::HashMap;

use tracing::info;

use crate::error::{Result, WerfError};
use crate::lock::{LockGuard, LockOptions};
use crate::logging;
use crate::runtime::BuildOptions;

use super::{Conveyor, ConveyorCtx, Image};

pub struct BuildPhase {
    opts: BuildOptions,
}

impl BuildPhase {
    pub fn new(opts: BuildOptions) -> Self {
        Self { opts }
    }

    pub fn run(&self, conveyor: &mut Conveyor) -> Result<()> {
        let Conveyor { ctx, images } = conveyor;

        for image in images.iter() {
            logging::log_service_process(&format!("Build {} images", image.name()), || {
                self.run_image(ctx, image)
            })?;
        }

        Ok(())
    }

    fn run_image(&self, ctx: &ConveyorCtx, image: &Image) -> Result<()> {
        let mut guards: HashMap<String, LockGuard> = HashMap::new();

        // Lock pass.
        for stage in image.stages() {
            let stage_image = stage.image();
            let (exists, name) = {
                let stage_image = stage_image.borrow();
                (stage_image.is_exists(), stage_image.name().to_string())
            };
            if exists {
                continue;
            }

            let lock_name = format!("{}.image.{}", ctx.project_name(), name);
            let guard =
                ctx.locks.acquire(&lock_name, LockOptions::with_default_timeout()).map_err(
                    |e| WerfError::docker(format!("failed to lock {}: {}", lock_name, e)),
                )?;
            guards.insert(name, guard);

            stage_image.borrow_mut().sync_docker_state(ctx.runtime.as_ref())?;
        }

        // Build pass.
        for stage in image.stages() {
            let stage_image = stage.image();
            let name = stage_image.borrow().name().to_string();
            let stage_label = stage.name().as_str();

            if stage_image.borrow().is_exists() {
                logging::log_service_state(stage_label, "[USING CACHE]");
                {
                    let stage_image = stage_image.borrow();
                    if let Some(inspect) = stage_image.inspect() {
                        info!("       id: {}", inspect.id);
                        info!("    image: {}", stage_image.name());
                        info!("     size: {}", inspect.size);
                        info!("  created: {}", inspect.created);
                    }
                }

                // Built by a cooperating process between signatures and the
                // lock pass.
                guards.remove(&name);
                continue;
            }

            logging::log_process(&format!("{} [BUILDING]", stage_label), || {
                stage.pre_run_hook(ctx).map_err(|e| WerfError::BuildFailed {
                    message: format!("stage '{}' preRunHook failed: {}", stage_label, e),
                })?;

                stage_image.borrow_mut().build(ctx.runtime.as_ref(), &self.opts).map_err(
                    |e| WerfError::BuildFailed {
                        message: format!("failed to build {}: {}", name, e),
                    },
                )?;

                stage_image.borrow_mut().save_in_cache(ctx.runtime.as_ref()).map_err(|e| {
                    WerfError::docker(format!("failed to save in cache image {}: {}", name, e))
                })?;

                let stage_image = stage_image.borrow();
                if let Some(inspect) = stage_image.inspect() {
                    info!("    image: {}", stage_image.name());
                    info!("       id: {}", inspect.id);
                    info!("     size: {}", inspect.size);
                    info!("  created: {}", inspect.created);
                }

                Ok(())
            })?;

            guards.remove(&name);
        }

        Ok(())
    }
}
