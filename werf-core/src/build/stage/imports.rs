//! Artifact imports: copy paths produced by another image of the project.

use std::fs;

use crate::build::ConveyorCtx;
use crate::config::ArtifactImportSpec;
use crate::error::{Result, WerfError};
use crate::image::SharedStageImage;
use crate::toolchain::toolchain_bin;

use super::{Stage, StageCore, StageName};

pub struct ArtifactImportsStage {
    core: StageCore,
    imports: Vec<ArtifactImportSpec>,
}

impl ArtifactImportsStage {
    pub fn new(image_name: &str, imports: Vec<ArtifactImportSpec>) -> Self {
        Self { core: StageCore::new(image_name), imports }
    }
}

impl Stage for ArtifactImportsStage {
    fn name(&self) -> StageName {
        StageName::ArtifactImports
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn is_empty(&self, _ctx: &ConveyorCtx, _prev_built: Option<&SharedStageImage>) -> Result<bool> {
        Ok(self.imports.is_empty())
    }

    fn dependencies(&self, ctx: &ConveyorCtx, _prev_image: &SharedStageImage) -> Result<String> {
        let mut parts = Vec::with_capacity(self.imports.len());

        for import in &self.imports {
            // The source image's terminal signature binds this stage to the
            // imported content.
            let source_signature = ctx.image_signature(&import.image).ok_or_else(|| {
                WerfError::InvalidConfig {
                    reason: format!("import references unknown image `{}`", import.image),
                }
            })?;

            parts.push(format!(
                "{}|{}|{}|{}|{}|{}|{}|{}",
                import.image,
                source_signature,
                import.add,
                import.to,
                import.include_paths.join(","),
                import.exclude_paths.join(","),
                import.owner.as_deref().unwrap_or_default(),
                import.group.as_deref().unwrap_or_default(),
            ));
        }

        Ok(parts.join("\n"))
    }

    fn pre_run_hook(&self, ctx: &ConveyorCtx) -> Result<()> {
        let toolchain = ctx.ensure_toolchain()?;
        let image = self.image();
        let mut image = image.borrow_mut();
        image.mutations.add_volumes_from(toolchain.as_str());

        for (index, import) in self.imports.iter().enumerate() {
            let source_signature = ctx.image_signature(&import.image).ok_or_else(|| {
                WerfError::InvalidConfig {
                    reason: format!("import references unknown image `{}`", import.image),
                }
            })?;
            let source_image = ctx.stage_image_name(&source_signature);

            let export_dir = ctx.tmp_dir().join(format!("import-{}-{}", index, import.image));
            fs::create_dir_all(&export_dir).map_err(|e| WerfError::io(&export_dir, e))?;

            // Trailing `/.` exports directory contents rather than the
            // directory itself.
            let source_path = format!("{}/.", import.add.trim_end_matches('/'));
            ctx.runtime.export_from_image(&source_image, &source_path, &export_dir)?;

            let container_dir = format!("/tmp/werf-import-{}", index);
            image.mutations.add_volume(format!("{}:{}:ro", export_dir.display(), container_dir));
            image.mutations.add_command(format!("{} -p {}", toolchain_bin("mkdir"), import.to));
            image.mutations.add_command(format!(
                "{} -a {}/. {}",
                toolchain_bin("cp"),
                container_dir,
                import.to
            ));

            if import.owner.is_some() || import.group.is_some() {
                let owner = import.owner.as_deref().unwrap_or("root");
                let group = import.group.as_deref().unwrap_or("root");
                image.mutations.add_command(format!(
                    "{} -R {}:{} {}",
                    toolchain_bin("chown"),
                    owner,
                    group,
                    import.to
                ));
            }
        }

        Ok(())
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
