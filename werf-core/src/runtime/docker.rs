//! Docker CLI runtime.
//!
//! Stage builds are run-and-commit: a build container is started from the
//! previous stage image with the accumulated volumes/env, the stage commands
//! run inside it, and the result is committed with the accumulated label and
//! instruction changes. Registry operations shell out to the same CLI.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use super::{docker_config_dir, BuildOptions, BuildSpec, ContainerRuntime, ImageInspect};
use crate::error::{Result, WerfError};

pub struct DockerCliRuntime {
    config_dir: Option<PathBuf>,
}

impl DockerCliRuntime {
    /// Connects to the daemon configuration and performs GitLab CI
    /// auto-login when the environment provides it.
    pub fn init() -> Result<Self> {
        let runtime = Self { config_dir: docker_config_dir() };
        runtime.ci_auto_login()?;
        Ok(runtime)
    }

    /// `docker login` with the GitLab CI job credentials, unless disabled
    /// via `WERF_IGNORE_CI_DOCKER_AUTOLOGIN`.
    fn ci_auto_login(&self) -> Result<()> {
        if std::env::var_os("WERF_IGNORE_CI_DOCKER_AUTOLOGIN").is_some() {
            return Ok(());
        }

        let (Ok(registry), Ok(token)) = (std::env::var("CI_REGISTRY"), std::env::var("CI_JOB_TOKEN"))
        else {
            return Ok(());
        };

        info!("Login into docker registry {} with CI job token", registry);

        let mut child = self
            .command()
            .args(["login", "--username", "gitlab-ci-token", "--password-stdin", registry.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| WerfError::docker(format!("failed to spawn docker login: {}", e)))?;

        use std::io::Write;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(token.as_bytes())
                .map_err(|e| WerfError::docker(format!("docker login: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| WerfError::docker(format!("docker login: {}", e)))?;
        if !output.status.success() {
            return Err(WerfError::docker(format!(
                "docker login to {} failed: {}",
                registry,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        if let Some(dir) = &self.config_dir {
            cmd.env("DOCKER_CONFIG", dir);
        }
        cmd
    }

    fn run_checked(&self, args: &[&str], context: &str) -> Result<String> {
        debug!("docker {}", args.join(" "));

        let output = self
            .command()
            .args(args)
            .output()
            .map_err(|e| WerfError::docker(format!("failed to spawn docker: {}", e)))?;

        if !output.status.success() {
            return Err(WerfError::docker(format!(
                "{} failed: {}",
                context,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn remove_container(&self, name: &str) {
        let _ = self.command().args(["rm", "--force", name]).stdout(Stdio::null()).stderr(Stdio::null()).status();
    }
}

impl ContainerRuntime for DockerCliRuntime {
    fn image_exists(&self, name: &str) -> Result<bool> {
        let status = self
            .command()
            .args(["image", "inspect", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| WerfError::docker(format!("failed to spawn docker: {}", e)))?;

        Ok(status.success())
    }

    fn image_inspect(&self, name: &str) -> Result<Option<ImageInspect>> {
        let output = self
            .command()
            .args(["image", "inspect", name])
            .output()
            .map_err(|e| WerfError::docker(format!("failed to spawn docker: {}", e)))?;

        if !output.status.success() {
            return Ok(None);
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| WerfError::docker(format!("cannot parse inspect of {}: {}", name, e)))?;
        let Some(entry) = parsed.as_array().and_then(|entries| entries.first()) else {
            return Ok(None);
        };

        let labels = entry
            .pointer("/Config/Labels")
            .and_then(|labels| labels.as_object())
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(ImageInspect {
            id: entry.get("Id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            size: entry.get("Size").and_then(|v| v.as_u64()).unwrap_or_default(),
            created: entry.get("Created").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            labels,
        }))
    }

    fn build(&self, spec: &BuildSpec, opts: &BuildOptions) -> Result<String> {
        let from_image = spec
            .from_image
            .as_deref()
            .ok_or_else(|| WerfError::docker("build requires a base image"))?;
        let container = format!("werf.build.{}", uuid::Uuid::new_v4());

        let mut run_args: Vec<String> =
            vec!["run".into(), "--name".into(), container.clone(), "--entrypoint".into(), "/bin/sh".into()];
        if let Some(platform) = &opts.platform {
            run_args.push("--platform".into());
            run_args.push(platform.clone());
        }
        for volume in &spec.volumes {
            run_args.push("--volume".into());
            run_args.push(volume.clone());
        }
        for source in &spec.volumes_from {
            run_args.push("--volumes-from".into());
            run_args.push(source.clone());
        }
        for (key, value) in &spec.env {
            run_args.push("--env".into());
            run_args.push(format!("{}={}", key, value));
        }
        run_args.push(from_image.to_string());
        run_args.push("-c".into());
        run_args.push(if spec.commands.is_empty() {
            "true".to_string()
        } else {
            spec.commands.join(" && ")
        });

        let run_args_ref: Vec<&str> = run_args.iter().map(String::as_str).collect();
        if let Err(err) = self.run_checked(&run_args_ref, "build container run") {
            self.remove_container(&container);
            return Err(WerfError::BuildFailed { message: err.to_string() });
        }

        let mut commit_args: Vec<String> = vec!["commit".into()];
        for (key, value) in &spec.labels {
            commit_args.push("--change".into());
            commit_args.push(format!("LABEL {}={}", key, value));
        }
        for instruction in &spec.commit_instructions {
            commit_args.push("--change".into());
            commit_args.push(instruction.clone());
        }
        commit_args.push(container.clone());

        let commit_args_ref: Vec<&str> = commit_args.iter().map(String::as_str).collect();
        let commit = self.run_checked(&commit_args_ref, "build container commit");
        self.remove_container(&container);
        let image_id = commit.map_err(|e| WerfError::BuildFailed { message: e.to_string() })?;

        debug!("built image {} (no_cache: {})", image_id, opts.no_cache);
        Ok(image_id)
    }

    fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.run_checked(&["tag", source, target], "image tag").map(|_| ())
    }

    fn untag(&self, name: &str) -> Result<()> {
        self.run_checked(&["rmi", name], "image untag").map(|_| ())
    }

    fn push(&self, name: &str) -> Result<()> {
        info!("Pushing {}", name);
        self.run_checked(&["push", name], "image push").map(|_| ())
    }

    fn pull(&self, name: &str) -> Result<()> {
        info!("Pulling {}", name);
        self.run_checked(&["pull", name], "image pull").map(|_| ())
    }

    fn export_from_image(&self, image: &str, path: &str, dest_dir: &Path) -> Result<()> {
        let container = format!("werf.export.{}", uuid::Uuid::new_v4());
        self.run_checked(&["create", "--name", container.as_str(), image], "export container create")?;

        let source = format!("{}:{}", container, path);
        let dest = dest_dir.to_string_lossy();
        let result = self.run_checked(&["cp", source.as_str(), dest.as_ref()], "export copy");

        self.remove_container(&container);
        result.map(|_| ())
    }

    fn ensure_service_container(&self, name: &str, image: &str) -> Result<()> {
        let status = self
            .command()
            .args(["container", "inspect", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| WerfError::docker(format!("failed to spawn docker: {}", e)))?;
        if status.success() {
            return Ok(());
        }

        info!("Creating service container {} from {}", name, image);
        self.run_checked(&["create", "--name", name, image], "service container create")
            .map(|_| ())
    }
}
