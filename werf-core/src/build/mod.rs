//! Build conveyor.
//!
//! The conveyor coordinates one incremental, cache-aware build run over the
//! project's images: signature calculation, invalidation of stale images,
//! image preparation, lock-managed build execution and publish with tag
//! bookkeeping. One logical task drives a run; cooperation with concurrent
//! invocations on the same host goes exclusively through named locks.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::{BaseImage, GitPathSpec, ImageSpec, ProjectConfig};
use crate::error::{Result, WerfError};
use crate::git::{GitRepo, LocalGitRepo, RemoteGitRepo};
use crate::image::{SharedStageImage, StageImage};
use crate::lock::LockManager;
use crate::runtime::{BuildOptions, ContainerRuntime};
use crate::toolchain;

mod build_phase;
mod image;
mod prepare_images_phase;
mod publish_phase;
mod renew_phase;
mod signatures_phase;
pub mod stage;

pub use build_phase::BuildPhase;
pub use image::Image;
pub use prepare_images_phase::PrepareImagesPhase;
pub use publish_phase::{PublishOptions, PublishPhase};
pub use renew_phase::RenewPhase;
pub use signatures_phase::SignaturesPhase;

use stage::{
    ArtifactImportsStage, DockerInstructionsStage, FromStage, GitArchiveStage, GitLatestPatchStage,
    GitPath, Stage, StageName, UserCommandStage,
};

/// Bumping this invalidates every stage signature.
pub const BUILD_CACHE_VERSION: &str = "33";

/// Upper bound on conveyor rebuilds triggered by the reset sentinel.
pub const MAX_CONVEYOR_RESETS: usize = 3;

/// Canonical stage image tag: `image-stage-{project}:{signature}`.
pub fn stage_image_name(project: &str, signature: &str) -> String {
    format!("image-stage-{}:{}", project, signature)
}

/// Stage signature: lowercase hex of
/// `sha256(dependencies || BUILD_CACHE_VERSION || prev_signature_or_empty)`.
pub fn stage_signature(dependencies: &str, prev_signature: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dependencies.as_bytes());
    hasher.update(BUILD_CACHE_VERSION.as_bytes());
    hasher.update(prev_signature.unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Process-wide collaborators handed to every conveyor built for a run.
#[derive(Clone)]
pub struct Collaborators {
    pub project_dir: PathBuf,
    pub project_tmp_dir: PathBuf,
    pub project_build_dir: PathBuf,
    pub ssh_auth_sock: Option<PathBuf>,
    pub runtime: Rc<dyn ContainerRuntime>,
    pub locks: LockManager,
}

/// Conveyor state shared with stages while the image list is borrowed
/// mutably by a phase.
pub struct ConveyorCtx {
    project_name: String,
    pub project_dir: PathBuf,
    project_tmp_dir: PathBuf,
    pub project_build_dir: PathBuf,
    ssh_auth_sock: Option<PathBuf>,
    pub runtime: Rc<dyn ContainerRuntime>,
    pub locks: LockManager,

    /// Stage image handles by canonical name. Stages with equal signatures
    /// resolve to equal names and therefore share one handle.
    stage_images: RefCell<HashMap<String, SharedStageImage>>,
    /// Signatures whose build instructions were already prepared this run.
    signature_index: RefCell<HashMap<String, SharedStageImage>>,
    /// Which stage carries the "actualize git files" effect, per image.
    building_git_stage: RefCell<HashMap<String, StageName>>,
    /// Terminal stage signature per image, set by the signatures phase.
    image_signatures: RefCell<HashMap<String, String>>,
    toolchain_container: RefCell<Option<String>>,
}

impl ConveyorCtx {
    fn new(project_name: String, collab: Collaborators) -> Self {
        Self {
            project_name,
            project_dir: collab.project_dir,
            project_tmp_dir: collab.project_tmp_dir,
            project_build_dir: collab.project_build_dir,
            ssh_auth_sock: collab.ssh_auth_sock,
            runtime: collab.runtime,
            locks: collab.locks,
            stage_images: RefCell::new(HashMap::new()),
            signature_index: RefCell::new(HashMap::new()),
            building_git_stage: RefCell::new(HashMap::new()),
            image_signatures: RefCell::new(HashMap::new()),
            toolchain_container: RefCell::new(None),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.project_tmp_dir
    }

    pub fn ssh_auth_sock(&self) -> Option<&Path> {
        self.ssh_auth_sock.as_deref()
    }

    /// Canonical stage image tag for a signature within this project.
    pub fn stage_image_name(&self, signature: &str) -> String {
        stage_image_name(&self.project_name, signature)
    }

    /// One shared handle per stage image name for the whole run.
    pub fn get_or_create_stage_image(
        &self,
        from_image: Option<String>,
        name: &str,
    ) -> SharedStageImage {
        self.stage_images
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| StageImage::shared(from_image, name))
            .clone()
    }

    pub fn stage_image(&self, name: &str) -> Option<SharedStageImage> {
        self.stage_images.borrow().get(name).cloned()
    }

    pub fn is_signature_prepared(&self, signature: &str) -> bool {
        self.signature_index.borrow().contains_key(signature)
    }

    pub fn mark_signature_prepared(&self, signature: &str, image: SharedStageImage) {
        self.signature_index.borrow_mut().insert(signature.to_string(), image);
    }

    pub fn building_git_stage(&self, image_name: &str) -> Option<StageName> {
        self.building_git_stage.borrow().get(image_name).copied()
    }

    pub fn set_building_git_stage(&self, image_name: &str, stage: StageName) {
        self.building_git_stage.borrow_mut().insert(image_name.to_string(), stage);
    }

    /// Terminal stage signature of a sibling image, available once its
    /// signatures were calculated.
    pub fn image_signature(&self, image_name: &str) -> Option<String> {
        self.image_signatures.borrow().get(image_name).cloned()
    }

    pub fn set_image_signature(&self, image_name: &str, signature: Option<String>) {
        if let Some(signature) = signature {
            self.image_signatures.borrow_mut().insert(image_name.to_string(), signature);
        }
    }

    /// Toolchain service container, created once per run.
    pub fn ensure_toolchain(&self) -> Result<String> {
        if let Some(name) = self.toolchain_container.borrow().clone() {
            return Ok(name);
        }

        let name = toolchain::ensure_toolchain_container(self.runtime.as_ref())?;
        *self.toolchain_container.borrow_mut() = Some(name.clone());
        Ok(name)
    }
}

/// The orchestrator of one build run.
pub struct Conveyor {
    pub(crate) ctx: ConveyorCtx,
    pub(crate) images: Vec<Image>,
}

impl Conveyor {
    /// Build a conveyor from configuration: order images topologically,
    /// initialize git repo handles and instantiate the stage chains.
    pub fn new(config: &ProjectConfig, collab: Collaborators) -> Result<Self> {
        let ctx = ConveyorCtx::new(config.project.clone(), collab);

        let ordered = images_in_order(config)?;
        let mut repos = GitRepoCache::default();
        let mut images = Vec::with_capacity(ordered.len());

        for spec in ordered {
            let stages = build_stages(&ctx, spec, &mut repos)?;
            images.push(Image::new(spec.name.clone(), spec.base()?, stages));
        }

        Ok(Self { ctx, images })
    }

    pub fn project_name(&self) -> &str {
        self.ctx.project_name()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// Run one build pass: signatures, renew, prepare, build. Returns the
    /// reset sentinel when the renew phase invalidated images.
    pub fn build(&mut self, opts: &BuildOptions) -> Result<()> {
        SignaturesPhase::run(self)?;
        RenewPhase::run(self)?;
        PrepareImagesPhase::run(self)?;
        BuildPhase::new(opts.clone()).run(self)
    }

    /// Publish the built images. Requires a completed build pass.
    pub fn publish(&mut self, opts: &PublishOptions) -> Result<()> {
        PublishPhase::new(opts.clone()).run(self)
    }
}

/// Top-level build driver: rebuild the conveyor and rerun on the reset
/// sentinel, bounded by [`MAX_CONVEYOR_RESETS`].
pub fn run_build(config: &ProjectConfig, collab: &Collaborators, opts: &BuildOptions) -> Result<()> {
    run(config, collab, opts, None)
}

/// Build then publish, under the same reset loop.
pub fn run_build_and_publish(
    config: &ProjectConfig,
    collab: &Collaborators,
    build_opts: &BuildOptions,
    publish_opts: &PublishOptions,
) -> Result<()> {
    run(config, collab, build_opts, Some(publish_opts))
}

fn run(
    config: &ProjectConfig,
    collab: &Collaborators,
    build_opts: &BuildOptions,
    publish_opts: Option<&PublishOptions>,
) -> Result<()> {
    for attempt in 1..=MAX_CONVEYOR_RESETS {
        let mut conveyor = Conveyor::new(config, collab.clone())?;

        match conveyor.build(build_opts) {
            Ok(()) => {
                if let Some(publish_opts) = publish_opts {
                    conveyor.publish(publish_opts)?;
                }
                return Ok(());
            }
            Err(WerfError::ConveyorShouldBeReset) => {
                warn!(
                    "Conveyor state is stale, rebuilding from configuration ({}/{})",
                    attempt, MAX_CONVEYOR_RESETS
                );
            }
            Err(err) => return Err(err),
        }
    }

    Err(WerfError::ResetLimitReached(MAX_CONVEYOR_RESETS))
}

/// Topological order over base-image and import dependencies, stable with
/// respect to the configured order (Kahn's algorithm).
fn images_in_order(config: &ProjectConfig) -> Result<Vec<&ImageSpec>> {
    let index: HashMap<&str, usize> =
        config.images.iter().enumerate().map(|(i, spec)| (spec.name.as_str(), i)).collect();

    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut in_degree = vec![0usize; config.images.len()];

    for (i, spec) in config.images.iter().enumerate() {
        let mut depends_on = Vec::new();

        if let BaseImage::ProjectImage(base) = spec.base()? {
            depends_on.push(base);
        }
        for import in &spec.import {
            depends_on.push(import.image.clone());
        }

        for name in depends_on {
            let Some(&dep) = index.get(name.as_str()) else {
                return Err(WerfError::InvalidConfig {
                    reason: format!("image `{}` depends on unknown image `{}`", spec.name, name),
                });
            };
            dependents.entry(dep).or_default().push(i);
            in_degree[i] += 1;
        }
    }

    let mut queue: VecDeque<usize> =
        (0..config.images.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(config.images.len());

    while let Some(i) = queue.pop_front() {
        ordered.push(&config.images[i]);
        for &dependent in dependents.get(&i).map(Vec::as_slice).unwrap_or_default() {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if ordered.len() != config.images.len() {
        return Err(WerfError::InvalidConfig {
            reason: "dependency cycle between images".to_string(),
        });
    }

    Ok(ordered)
}

/// Per-run cache of git repo handles: one local handle for the project
/// repository, one remote handle per url (cloned/fetched on first use).
#[derive(Default)]
struct GitRepoCache {
    local: Option<Rc<dyn GitRepo>>,
    remote: HashMap<String, Rc<dyn GitRepo>>,
}

impl GitRepoCache {
    fn resolve(&mut self, ctx: &ConveyorCtx, spec: &GitPathSpec) -> Result<Rc<dyn GitRepo>> {
        match &spec.url {
            None => {
                if let Some(repo) = &self.local {
                    return Ok(repo.clone());
                }
                let repo: Rc<dyn GitRepo> = Rc::new(LocalGitRepo::new(
                    "own",
                    ctx.project_dir.clone(),
                    ctx.locks.clone(),
                ));
                self.local = Some(repo.clone());
                Ok(repo)
            }
            Some(url) => {
                if let Some(repo) = self.remote.get(url) {
                    return Ok(repo.clone());
                }
                let remote =
                    RemoteGitRepo::open(spec.resolved_name(), url.clone(), ctx.locks.clone())?;
                remote.clone_and_fetch()?;
                let repo: Rc<dyn GitRepo> = Rc::new(remote);
                self.remote.insert(url.clone(), repo.clone());
                Ok(repo)
            }
        }
    }
}

/// Instantiate the canonical stage chain for one image spec. Empty stages
/// are pruned later by the signatures phase.
fn build_stages(
    ctx: &ConveyorCtx,
    spec: &ImageSpec,
    repos: &mut GitRepoCache,
) -> Result<Vec<Box<dyn Stage>>> {
    let mut git_paths = Vec::with_capacity(spec.git.len());
    for path_spec in &spec.git {
        git_paths.push(Rc::new(GitPath {
            name: path_spec.resolved_name(),
            repo: repos.resolve(ctx, path_spec)?,
            add: path_spec.add.clone(),
            to: path_spec.to.clone(),
            branch: path_spec.branch.clone(),
            tag: path_spec.tag.clone(),
            commit: path_spec.commit.clone(),
            include_paths: path_spec.include_paths.clone(),
            exclude_paths: path_spec.exclude_paths.clone(),
        }));
    }

    let name = spec.name.as_str();
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(FromStage::new(name)),
        Box::new(UserCommandStage::new(name, StageName::BeforeInstall, spec.before_install.clone())),
        Box::new(GitArchiveStage::new(name, git_paths.clone())),
        Box::new(UserCommandStage::new(name, StageName::Install, spec.install.clone())),
        Box::new(UserCommandStage::new(name, StageName::AfterInstall, spec.after_install.clone())),
        Box::new(UserCommandStage::new(name, StageName::BeforeSetup, spec.before_setup.clone())),
        Box::new(UserCommandStage::new(name, StageName::Setup, spec.setup.clone())),
        Box::new(UserCommandStage::new(name, StageName::AfterSetup, spec.after_setup.clone())),
        Box::new(ArtifactImportsStage::new(name, spec.import.clone())),
        Box::new(GitLatestPatchStage::new(name, git_paths)),
        Box::new(DockerInstructionsStage::new(name, spec.docker.clone())),
    ];

    Ok(stages)
}
