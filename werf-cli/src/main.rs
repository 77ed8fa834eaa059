use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use werf_core::build::PublishOptions;
use werf_core::runtime::BuildOptions;
use werf_core::{
    paths, Collaborators, DockerCliRuntime, LockManager, ProjectConfig, ProjectTmpDir,
};

#[derive(Parser)]
#[command(name = "werf")]
#[command(about = "Deploy-and-build tool: incremental, cache-aware image builds", long_about = None)]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build images defined by werf.yaml
    Build {
        /// Disable the backend build cache
        #[arg(long)]
        no_cache: bool,

        /// Target platform (e.g. "linux/amd64")
        #[arg(long)]
        platform: Option<String>,
    },

    /// Build images and push them into a docker registry
    Push {
        /// Docker repository to push images to. CI_REGISTRY_IMAGE is used
        /// by default if available.
        #[arg(long)]
        repo: Option<String>,

        /// Tag to publish under (repeatable)
        #[arg(long = "tag", default_values_t = vec!["latest".to_string()])]
        tags: Vec<String>,

        /// Push images with the stages cache
        #[arg(long)]
        with_stages: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(false)
        .init();

    if let Err(err) = run() {
        tracing::error!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let project_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine project dir")?,
    };

    let config = load_config(&project_dir)?;

    let locks = LockManager::new(paths::locks_dir()).context("lock manager init failed")?;
    let runtime = DockerCliRuntime::init().context("docker init failed")?;
    let tmp_dir = ProjectTmpDir::create().context("getting project tmp dir failed")?;

    let collab = Collaborators {
        project_dir,
        project_tmp_dir: tmp_dir.path().to_path_buf(),
        project_build_dir: paths::project_build_dir(&config.project),
        ssh_auth_sock: std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from),
        runtime: Rc::new(runtime),
        locks,
    };

    match cli.command {
        Commands::Build { no_cache, platform } => {
            let opts = BuildOptions { no_cache, platform };
            werf_core::run_build(&config, &collab, &opts).context("build failed")?;
        }
        Commands::Push { repo, tags, with_stages } => {
            let repo = repo
                .or_else(|| std::env::var("CI_REGISTRY_IMAGE").ok())
                .context("--repo is required (or CI_REGISTRY_IMAGE)")?;

            let build_opts = BuildOptions::default();
            let publish_opts = PublishOptions { repo, tags, with_stages };
            werf_core::run_build_and_publish(&config, &collab, &build_opts, &publish_opts)
                .context("push failed")?;
        }
    }

    Ok(())
}

fn load_config(project_dir: &std::path::Path) -> Result<ProjectConfig> {
    let config_path = project_dir.join("werf.yaml");
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("cannot read {}", config_path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("cannot parse {}", config_path.display()))
}
