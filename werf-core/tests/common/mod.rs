//! Shared test helpers: in-memory container runtime, scratch git
//! repositories and conveyor wiring.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

use werf_core::build::Collaborators;
use werf_core::config::{
    ArtifactImportSpec, DockerInstructionsSpec, GitPathSpec, ImageSpec, ProjectConfig,
};
use werf_core::error::{Result, WerfError};
use werf_core::runtime::{BuildOptions, BuildSpec, ContainerRuntime, ImageInspect};
use werf_core::tmp::ProjectTmpDir;
use werf_core::LockManager;

/// Process-wide werf home under a scratch dir, initialized once per test
/// binary so path resolution never touches the real home.
pub fn werf_home() -> &'static Path {
    static HOME: OnceLock<PathBuf> = OnceLock::new();
    HOME.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("werf-test-home-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::env::set_var("WERF_HOME", &dir);
        dir
    })
}

#[derive(Default)]
struct FakeState {
    images: HashMap<String, ImageInspect>,
    next_id: u64,
    build_count: usize,
    pushed: Vec<String>,
    push_failures: HashSet<String>,
    service_containers: HashSet<String>,
    exports: Vec<(String, String)>,
}

/// In-memory [`ContainerRuntime`]: images are inspect records keyed by
/// name, labels inherit through the from-image chain like docker's do.
pub struct FakeRuntime {
    state: RefCell<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { state: RefCell::new(FakeState::default()) })
    }

    pub fn build_count(&self) -> usize {
        self.state.borrow().build_count
    }

    pub fn pushed(&self) -> Vec<String> {
        self.state.borrow().pushed.clone()
    }

    pub fn exports(&self) -> Vec<(String, String)> {
        self.state.borrow().exports.clone()
    }

    pub fn fail_push_of(&self, target: &str) {
        self.state.borrow_mut().push_failures.insert(target.to_string());
    }

    pub fn image_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state.borrow().images.get(name).map(|i| i.labels.clone())
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.state.borrow().images.contains_key(name)
    }

    pub fn image_names(&self) -> Vec<String> {
        self.state.borrow().images.keys().cloned().collect()
    }
}

impl ContainerRuntime for FakeRuntime {
    fn image_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.borrow().images.contains_key(name))
    }

    fn image_inspect(&self, name: &str) -> Result<Option<ImageInspect>> {
        Ok(self.state.borrow().images.get(name).cloned())
    }

    fn build(&self, spec: &BuildSpec, _opts: &BuildOptions) -> Result<String> {
        let mut state = self.state.borrow_mut();

        let mut labels = spec
            .from_image
            .as_ref()
            .and_then(|from| state.images.get(from))
            .map(|parent| parent.labels.clone())
            .unwrap_or_default();
        labels.extend(spec.labels.clone());

        state.build_count += 1;
        state.next_id += 1;
        let id = format!("sha256:fake{:08x}", state.next_id);

        state.images.insert(
            id.clone(),
            ImageInspect {
                id: id.clone(),
                size: 1024,
                created: "2019-04-01T00:00:00Z".to_string(),
                labels,
            },
        );

        Ok(id)
    }

    fn tag(&self, source: &str, target: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let image = state
            .images
            .get(source)
            .cloned()
            .ok_or_else(|| WerfError::docker(format!("no such image: {}", source)))?;
        state.images.insert(target.to_string(), image);
        Ok(())
    }

    fn untag(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state
            .images
            .remove(name)
            .ok_or_else(|| WerfError::docker(format!("no such image: {}", name)))?;
        Ok(())
    }

    fn push(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.push_failures.contains(name) {
            return Err(WerfError::docker(format!("push of {} denied", name)));
        }
        state.pushed.push(name.to_string());
        Ok(())
    }

    fn pull(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = format!("sha256:pulled{:08x}", state.next_id);
        state.images.insert(
            name.to_string(),
            ImageInspect {
                id,
                size: 4096,
                created: "2019-01-01T00:00:00Z".to_string(),
                labels: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn export_from_image(&self, image: &str, path: &str, dest_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dest_dir).map_err(|e| WerfError::io(dest_dir, e))?;
        std::fs::write(dest_dir.join(".exported"), image).map_err(|e| WerfError::io(dest_dir, e))?;
        self.state.borrow_mut().exports.push((image.to_string(), path.to_string()));
        Ok(())
    }

    fn ensure_service_container(&self, name: &str, _image: &str) -> Result<()> {
        self.state.borrow_mut().service_containers.insert(name.to_string());
        Ok(())
    }
}

/// Collaborator set over the fake runtime. The tmp dir guard must be kept
/// alive for the duration of the test.
pub fn collaborators(
    runtime: Rc<FakeRuntime>,
    project_dir: &Path,
) -> (Collaborators, ProjectTmpDir) {
    let home = werf_home();
    let locks = LockManager::new(home.join("locks")).unwrap();
    let tmp_dir = ProjectTmpDir::create().unwrap();

    let collab = Collaborators {
        project_dir: project_dir.to_path_buf(),
        project_tmp_dir: tmp_dir.path().to_path_buf(),
        project_build_dir: home.join("builds").join("demo"),
        ssh_auth_sock: None,
        runtime,
        locks,
    };

    (collab, tmp_dir)
}

/// Image spec with a registry base and no optional sections.
pub fn image_spec(name: &str) -> ImageSpec {
    ImageSpec {
        name: name.to_string(),
        from: Some("alpine:3.19".to_string()),
        from_image: None,
        before_install: vec![],
        install: vec![],
        after_install: vec![],
        before_setup: vec![],
        setup: vec![],
        after_setup: vec![],
        git: vec![],
        import: vec![],
        docker: DockerInstructionsSpec::default(),
    }
}

pub fn config(project: &str, images: Vec<ImageSpec>) -> ProjectConfig {
    ProjectConfig { project: project.to_string(), images }
}

pub fn own_git_path(to: &str) -> GitPathSpec {
    GitPathSpec {
        name: None,
        url: None,
        add: "/".to_string(),
        to: to.to_string(),
        branch: None,
        tag: None,
        commit: None,
        include_paths: vec![],
        exclude_paths: vec![],
    }
}

pub fn import_spec(image: &str, add: &str, to: &str) -> ArtifactImportSpec {
    ArtifactImportSpec {
        image: image.to_string(),
        add: add.to_string(),
        to: to.to_string(),
        include_paths: vec![],
        exclude_paths: vec![],
        owner: None,
        group: None,
    }
}

// Scratch git repositories.

pub fn init_git_repo(path: &Path) -> git2::Repository {
    std::fs::create_dir_all(path).unwrap();
    let repo = git2::Repository::init(path).unwrap();
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "tester").unwrap();
    config.set_str("user.email", "tester@example.com").unwrap();
    repo
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn commit_all(repo: &git2::Repository, message: &str) -> String {
    let mut index = repo.index().unwrap();
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None).unwrap();
    index.write().unwrap();

    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let signature = git2::Signature::now("tester", "tester@example.com").unwrap();

    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap()
        .to_string()
}
