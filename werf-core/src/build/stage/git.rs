//! Git stages: archive import and latest-patch actualization.

use std::rc::Rc;

use tracing::info;

use crate::build::ConveyorCtx;
use crate::error::Result;
use crate::image::SharedStageImage;
use crate::toolchain::toolchain_bin;

use super::{GitPath, Stage, StageCore, StageName};

/// Imports the mapped repository content at the resolved commits.
pub struct GitArchiveStage {
    core: StageCore,
    git_paths: Vec<Rc<GitPath>>,
}

/// Brings previously imported content up to the latest resolved commits by
/// applying patches.
pub struct GitLatestPatchStage {
    core: StageCore,
    git_paths: Vec<Rc<GitPath>>,
}

impl GitArchiveStage {
    pub fn new(image_name: &str, git_paths: Vec<Rc<GitPath>>) -> Self {
        Self { core: StageCore::new(image_name), git_paths }
    }
}

impl GitLatestPatchStage {
    pub fn new(image_name: &str, git_paths: Vec<Rc<GitPath>>) -> Self {
        Self { core: StageCore::new(image_name), git_paths }
    }
}

impl Stage for GitArchiveStage {
    fn name(&self) -> StageName {
        StageName::GitArchive
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn is_empty(&self, _ctx: &ConveyorCtx, _prev_built: Option<&SharedStageImage>) -> Result<bool> {
        Ok(self.git_paths.is_empty())
    }

    fn dependencies(&self, _ctx: &ConveyorCtx, _prev_image: &SharedStageImage) -> Result<String> {
        // Mapping parameters only: repository content lands here once and is
        // then advanced by the latest-patch stage.
        let digests: Vec<String> = self.git_paths.iter().map(|p| p.params_digest()).collect();
        Ok(digests.join("\n"))
    }

    fn after_image_sync_hook(&self, ctx: &ConveyorCtx) -> Result<()> {
        claim_building_git_stage(ctx, &self.core.image_name, self.name(), &self.image())
    }

    fn pre_run_hook(&self, ctx: &ConveyorCtx) -> Result<()> {
        if ctx.building_git_stage(&self.core.image_name) != Some(self.name()) {
            return Ok(());
        }

        let toolchain = ctx.ensure_toolchain()?;
        let image = self.image();
        let mut image = image.borrow_mut();
        image.mutations.add_volumes_from(toolchain.as_str());

        for (index, git_path) in self.git_paths.iter().enumerate() {
            let commit = git_path.resolve_commit()?;
            let Some(host_path) = git_path.assemble_archive(ctx, &commit)? else { continue };

            let container_path = format!("/tmp/werf-archive-{}.tar", index);
            image.mutations.add_volume(format!("{}:{}:ro", host_path.display(), container_path));
            image.mutations.add_command(format!(
                "{} -p {}",
                toolchain_bin("mkdir"),
                git_path.to
            ));
            image.mutations.add_command(format!(
                "{} -x -f {} -C {}",
                toolchain_bin("tar"),
                container_path,
                git_path.to
            ));
        }

        Ok(())
    }

    fn prepare_image(
        &self,
        _ctx: &ConveyorCtx,
        _prev_built: Option<&SharedStageImage>,
        target: &SharedStageImage,
    ) -> Result<()> {
        stamp_commit_labels(&self.git_paths, target)
    }

    fn should_be_reset(&self, built: &SharedStageImage) -> Result<bool> {
        git_stage_should_be_reset(&self.git_paths, built)
    }
}

impl Stage for GitLatestPatchStage {
    fn name(&self) -> StageName {
        StageName::GitLatestPatch
    }

    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn is_empty(&self, _ctx: &ConveyorCtx, _prev_built: Option<&SharedStageImage>) -> Result<bool> {
        Ok(self.git_paths.is_empty())
    }

    fn dependencies(&self, _ctx: &ConveyorCtx, _prev_image: &SharedStageImage) -> Result<String> {
        // Content checksums bind this stage to the mapped repository state,
        // so a source change invalidates exactly this stage and its
        // dependents.
        let mut parts = Vec::with_capacity(self.git_paths.len());
        for git_path in &self.git_paths {
            let commit = git_path.resolve_commit()?;
            let checksum = git_path.content_checksum(&commit)?;
            parts.push(format!("{}:{}", git_path.params_digest(), checksum.digest()));
        }
        Ok(parts.join("\n"))
    }

    fn after_image_sync_hook(&self, ctx: &ConveyorCtx) -> Result<()> {
        claim_building_git_stage(ctx, &self.core.image_name, self.name(), &self.image())
    }

    fn pre_run_hook(&self, ctx: &ConveyorCtx) -> Result<()> {
        let image = self.image();

        let parent_labels = {
            let from_name = image.borrow().from_image().map(str::to_string);
            from_name
                .and_then(|name| ctx.stage_image(&name))
                .map(|parent| parent.borrow().labels())
                .unwrap_or_default()
        };

        let toolchain = ctx.ensure_toolchain()?;
        let mut image = image.borrow_mut();
        image.mutations.add_volumes_from(toolchain.as_str());

        for (index, git_path) in self.git_paths.iter().enumerate() {
            let to_commit = git_path.resolve_commit()?;
            let from_commit = git_path
                .commit_from_image_labels(&parent_labels)
                .unwrap_or_else(|| to_commit.clone());

            if from_commit == to_commit {
                continue;
            }

            let Some(host_path) = git_path.assemble_patch(ctx, &from_commit, &to_commit)? else {
                continue;
            };

            let container_path = format!("/tmp/werf-patch-{}.patch", index);
            image.mutations.add_volume(format!("{}:{}:ro", host_path.display(), container_path));
            image.mutations.add_command(format!(
                "{} apply --whitespace=nowarn --directory={} --unsafe-paths {}",
                toolchain_bin("git"),
                git_path.to.trim_end_matches('/'),
                container_path
            ));
        }

        Ok(())
    }

    fn prepare_image(
        &self,
        _ctx: &ConveyorCtx,
        _prev_built: Option<&SharedStageImage>,
        target: &SharedStageImage,
    ) -> Result<()> {
        stamp_commit_labels(&self.git_paths, target)
    }

    fn should_be_reset(&self, built: &SharedStageImage) -> Result<bool> {
        git_stage_should_be_reset(&self.git_paths, built)
    }
}

/// The first git-touching stage whose image does not exist claims the
/// per-image "actualize git files" slot.
fn claim_building_git_stage(
    ctx: &ConveyorCtx,
    image_name: &str,
    stage_name: StageName,
    stage_image: &SharedStageImage,
) -> Result<()> {
    if stage_image.borrow().is_exists() {
        return Ok(());
    }

    if ctx.building_git_stage(image_name).is_none() {
        ctx.set_building_git_stage(image_name, stage_name);
        info!("Git files will be actualized on the stage {}", stage_name);
    }

    Ok(())
}

/// Stamp the resolved commit of every git path onto the target image so the
/// renew phase can verify provenance later.
fn stamp_commit_labels(git_paths: &[Rc<GitPath>], target: &SharedStageImage) -> Result<()> {
    let mut labels = Vec::with_capacity(git_paths.len());
    for git_path in git_paths {
        labels.push((git_path.commit_label_key(), git_path.resolve_commit()?));
    }

    target.borrow_mut().mutations.add_label(labels);
    Ok(())
}

/// Reset is required when any stamped commit is no longer reachable, or the
/// image carries no stamp at all (unknown provenance).
fn git_stage_should_be_reset(git_paths: &[Rc<GitPath>], built: &SharedStageImage) -> Result<bool> {
    let labels = built.borrow().labels();

    for git_path in git_paths {
        match git_path.commit_from_image_labels(&labels) {
            Some(commit) => {
                if !git_path.repo.is_commit_exists(&commit)? {
                    return Ok(true);
                }
            }
            None => return Ok(true),
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_without_git_paths_never_resets() {
        let image = crate::image::StageImage::shared(None, "image-stage-demo:feed");
        let paths: Vec<Rc<GitPath>> = vec![];
        assert!(!git_stage_should_be_reset(&paths, &image).unwrap());
    }
}
