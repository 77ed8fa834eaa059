//! Stage image handles.
//!
//! A [`StageImage`] is the container-store artifact backing one stage.
//! Stages with equal signatures share one handle (`Rc<RefCell<_>>`), so a
//! build observed through one stage is visible to every other holder.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Result, WerfError};
use crate::runtime::{BuildOptions, BuildSpec, ContainerRuntime, ImageInspect};

pub type SharedStageImage = Rc<RefCell<StageImage>>;

/// Mutations accumulated for the next build of a stage image, applied
/// atomically at build time.
#[derive(Debug, Clone, Default)]
pub struct ContainerMutations {
    labels: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    volumes: Vec<String>,
    volumes_from: Vec<String>,
    commands: Vec<String>,
    commit_instructions: Vec<String>,
}

impl ContainerMutations {
    pub fn add_label(&mut self, labels: impl IntoIterator<Item = (String, String)>) {
        self.labels.extend(labels);
    }

    pub fn add_env(&mut self, env: impl IntoIterator<Item = (String, String)>) {
        self.env.extend(env);
    }

    pub fn add_volume(&mut self, volume: impl Into<String>) {
        self.volumes.push(volume.into());
    }

    pub fn add_volumes_from(&mut self, container: impl Into<String>) {
        self.volumes_from.push(container.into());
    }

    pub fn add_command(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    pub fn add_commands(&mut self, commands: impl IntoIterator<Item = String>) {
        self.commands.extend(commands);
    }

    pub fn add_commit_instruction(&mut self, instruction: impl Into<String>) {
        self.commit_instructions.push(instruction.into());
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

/// Handle to one image in the local container store.
#[derive(Debug)]
pub struct StageImage {
    name: String,
    from_image: Option<String>,
    exists: bool,
    inspect: Option<ImageInspect>,
    built_id: Option<String>,
    pub mutations: ContainerMutations,
}

impl StageImage {
    pub fn new(from_image: Option<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from_image,
            exists: false,
            inspect: None,
            built_id: None,
            mutations: ContainerMutations::default(),
        }
    }

    pub fn shared(from_image: Option<String>, name: impl Into<String>) -> SharedStageImage {
        Rc::new(RefCell::new(Self::new(from_image, name)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the image this stage builds from (previous stage or base).
    pub fn from_image(&self) -> Option<&str> {
        self.from_image.as_deref()
    }

    pub fn is_exists(&self) -> bool {
        self.exists
    }

    pub fn inspect(&self) -> Option<&ImageInspect> {
        self.inspect.as_ref()
    }

    /// Labels read back from the container store (empty when not present).
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.inspect.as_ref().map(|i| i.labels.clone()).unwrap_or_default()
    }

    /// Refresh existence and inspect info from the daemon. Idempotent.
    pub fn sync_docker_state(&mut self, runtime: &dyn ContainerRuntime) -> Result<()> {
        self.inspect = runtime.image_inspect(&self.name)?;
        self.exists = self.inspect.is_some();
        Ok(())
    }

    /// Run the accumulated build. The result stays unnamed until
    /// [`StageImage::save_in_cache`].
    pub fn build(&mut self, runtime: &dyn ContainerRuntime, opts: &BuildOptions) -> Result<()> {
        let spec = BuildSpec {
            from_image: self.from_image.clone(),
            labels: self.mutations.labels.clone(),
            env: self.mutations.env.clone(),
            volumes: self.mutations.volumes.clone(),
            volumes_from: self.mutations.volumes_from.clone(),
            commands: self.mutations.commands.clone(),
            commit_instructions: self.mutations.commit_instructions.clone(),
        };

        self.built_id = Some(runtime.build(&spec, opts)?);
        Ok(())
    }

    /// Tag the build result under the canonical stage-image name.
    pub fn save_in_cache(&mut self, runtime: &dyn ContainerRuntime) -> Result<()> {
        let built_id = self
            .built_id
            .clone()
            .ok_or_else(|| WerfError::docker(format!("{} was not built", self.name)))?;

        runtime.tag(&built_id, &self.name)?;
        self.sync_docker_state(runtime)
    }

    pub fn tag_as(&self, runtime: &dyn ContainerRuntime, target: &str) -> Result<()> {
        runtime.tag(&self.name, target)
    }

    pub fn untag(&mut self, runtime: &dyn ContainerRuntime) -> Result<()> {
        runtime.untag(&self.name)?;
        self.exists = false;
        self.inspect = None;
        Ok(())
    }

    pub fn pull(&mut self, runtime: &dyn ContainerRuntime) -> Result<()> {
        runtime.pull(&self.name)?;
        self.sync_docker_state(runtime)
    }
}
