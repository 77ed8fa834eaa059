//! Publish phase: tag bookkeeping and composite failure reporting.

mod common;

use common::{collaborators, config, image_spec, FakeRuntime};
use werf_core::build::{Conveyor, PublishOptions};
use werf_core::error::WerfError;
use werf_core::runtime::BuildOptions;

fn built_conveyor(
    runtime: std::rc::Rc<FakeRuntime>,
    project: &str,
) -> (Conveyor, werf_core::ProjectTmpDir, tempfile::TempDir) {
    let project_dir = tempfile::tempdir().unwrap();
    let (collab, tmp) = collaborators(runtime, project_dir.path());

    let mut spec = image_spec("app");
    spec.install = vec!["make".to_string()];
    let config = config(project, vec![spec]);

    let mut conveyor = Conveyor::new(&config, collab).unwrap();
    conveyor.build(&BuildOptions::default()).unwrap();
    (conveyor, tmp, project_dir)
}

#[test]
fn publish_tags_every_requested_tag() {
    let runtime = FakeRuntime::new();
    let (mut conveyor, _tmp, _dir) = built_conveyor(runtime.clone(), "demo");

    conveyor
        .publish(&PublishOptions {
            repo: "registry.example.com/demo".to_string(),
            tags: vec!["v1".to_string(), "latest".to_string()],
            with_stages: false,
        })
        .unwrap();

    let pushed = runtime.pushed();
    assert!(pushed.contains(&"registry.example.com/demo/app:v1".to_string()));
    assert!(pushed.contains(&"registry.example.com/demo/app:latest".to_string()));

    // Destination tags are removed locally after the push.
    assert!(!runtime.has_image("registry.example.com/demo/app:v1"));
    assert!(!runtime.has_image("registry.example.com/demo/app:latest"));
}

#[test]
fn failed_tag_does_not_prevent_the_others() {
    let runtime = FakeRuntime::new();
    let (mut conveyor, _tmp, _dir) = built_conveyor(runtime.clone(), "demo");

    runtime.fail_push_of("registry.example.com/demo/app:latest");

    let result = conveyor.publish(&PublishOptions {
        repo: "registry.example.com/demo".to_string(),
        tags: vec!["v1".to_string(), "latest".to_string()],
        with_stages: false,
    });

    // v1 made it out.
    assert!(runtime.pushed().contains(&"registry.example.com/demo/app:v1".to_string()));

    // And the composite names the failed tag.
    match result {
        Err(WerfError::Publish(composite)) => {
            assert_eq!(composite.failures.len(), 1);
            assert_eq!(composite.failures[0].tag, "latest");
        }
        other => panic!("expected composite publish error, got {:?}", other.err()),
    }
}

#[test]
fn both_failures_are_reported_in_one_composite() {
    let runtime = FakeRuntime::new();
    let (mut conveyor, _tmp, _dir) = built_conveyor(runtime.clone(), "demo");

    runtime.fail_push_of("registry.example.com/demo/app:v1");
    runtime.fail_push_of("registry.example.com/demo/app:latest");

    let result = conveyor.publish(&PublishOptions {
        repo: "registry.example.com/demo".to_string(),
        tags: vec!["v1".to_string(), "latest".to_string()],
        with_stages: false,
    });

    match result {
        Err(WerfError::Publish(composite)) => {
            let tags: Vec<&str> =
                composite.failures.iter().map(|f| f.tag.as_str()).collect();
            assert_eq!(tags, vec!["v1", "latest"]);
        }
        other => panic!("expected composite publish error, got {:?}", other.err()),
    }
}

#[test]
fn with_stages_pushes_every_stage_signature_once() {
    let runtime = FakeRuntime::new();
    let (mut conveyor, _tmp, _dir) = built_conveyor(runtime.clone(), "demo");

    conveyor
        .publish(&PublishOptions {
            repo: "registry.example.com/demo".to_string(),
            tags: vec!["v1".to_string()],
            with_stages: true,
        })
        .unwrap();

    let pushed = runtime.pushed();
    let stage_pushes: Vec<&String> =
        pushed.iter().filter(|name| name.contains(":image-stage-")).collect();

    // from + install.
    assert_eq!(stage_pushes.len(), 2);

    // No duplicates.
    let mut deduped = stage_pushes.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), stage_pushes.len());
}

#[test]
fn publish_requires_built_stages() {
    let runtime = FakeRuntime::new();
    let project_dir = tempfile::tempdir().unwrap();
    let (collab, _tmp) = collaborators(runtime, project_dir.path());

    let mut spec = image_spec("app");
    spec.install = vec!["make".to_string()];
    let config = config("demo", vec![spec]);

    let mut conveyor = Conveyor::new(&config, collab).unwrap();
    werf_core::build::SignaturesPhase::run(&mut conveyor).unwrap();

    let result = conveyor.publish(&PublishOptions {
        repo: "registry.example.com/demo".to_string(),
        tags: vec!["v1".to_string()],
        with_stages: false,
    });

    assert!(result.is_err());
}
