//! Git facade behavior over real scratch repositories.

mod common;

use common::{commit_all, init_git_repo, werf_home, write_file};
use werf_core::git::{ArchiveOptions, ChecksumOptions, GitRepo, LocalGitRepo, PatchOptions, RemoteGitRepo};
use werf_core::error::WerfError;
use werf_core::LockManager;

fn locks() -> LockManager {
    LockManager::new(werf_home().join("locks")).unwrap()
}

fn checksum_opts(commit: &str, paths: &[&str]) -> ChecksumOptions {
    ChecksumOptions {
        commit: commit.to_string(),
        base_path: String::new(),
        paths: paths.iter().map(|s| s.to_string()).collect(),
        include_paths: vec![],
        exclude_paths: vec![],
    }
}

#[test]
fn head_commit_and_existence() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "a.txt", "one");
    let commit = commit_all(&repo, "first");

    let facade = LocalGitRepo::new("own", dir.path(), locks());

    assert_eq!(facade.head_commit().unwrap(), commit);
    assert!(facade.is_commit_exists(&commit).unwrap());
    assert!(!facade
        .is_commit_exists("0000000000000000000000000000000000000000")
        .unwrap());
}

#[test]
fn bad_commit_hash_reports_context() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "a.txt", "one");
    commit_all(&repo, "first");

    let facade = LocalGitRepo::new("own", dir.path(), locks());
    let err = facade.is_commit_exists("not-a-hash").unwrap_err();

    match err {
        WerfError::Git { repo, message } => {
            assert_eq!(repo, "own");
            assert!(message.contains("not-a-hash"));
        }
        other => panic!("expected git error, got {:?}", other),
    }
}

#[test]
fn find_commit_by_message_is_breadth_first_from_head() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());

    write_file(dir.path(), "a.txt", "one");
    let first = commit_all(&repo, "release: 1.0");
    write_file(dir.path(), "a.txt", "two");
    let second = commit_all(&repo, "release: 1.1");
    write_file(dir.path(), "a.txt", "three");
    commit_all(&repo, "chore: noise");
    drop(repo);

    let facade = LocalGitRepo::new("own", dir.path(), locks());

    // Nearest match to HEAD wins.
    assert_eq!(facade.find_commit_id_by_message("^release:").unwrap(), Some(second.clone()));
    assert_eq!(facade.find_commit_id_by_message("release: 1\\.0").unwrap(), Some(first));
    assert_eq!(facade.find_commit_id_by_message("^fix:").unwrap(), None);
}

#[test]
fn emptiness_and_branch_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());

    let facade = LocalGitRepo::new("own", dir.path(), locks());
    assert!(facade.is_empty().unwrap());

    write_file(dir.path(), "a.txt", "one");
    let commit = commit_all(&repo, "first");
    assert!(!facade.is_empty().unwrap());

    let branch = facade.head_branch_name().unwrap();
    assert_eq!(facade.latest_branch_commit(&branch).unwrap(), commit);
    assert!(facade.latest_branch_commit("no-such-branch").is_err());
}

#[test]
fn detached_head_is_not_a_branch() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "a.txt", "one");
    let commit = commit_all(&repo, "first");

    repo.set_head_detached(git2::Oid::from_str(&commit).unwrap()).unwrap();
    drop(repo);

    let facade = LocalGitRepo::new("own", dir.path(), locks());
    assert!(matches!(facade.head_branch_name(), Err(WerfError::NotABranch)));
}

#[test]
fn tag_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "a.txt", "one");
    let commit = commit_all(&repo, "first");

    let object = repo.find_object(git2::Oid::from_str(&commit).unwrap(), None).unwrap();
    repo.tag_lightweight("v1.0.0", &object, false).unwrap();
    drop(object);
    drop(repo);

    let facade = LocalGitRepo::new("own", dir.path(), locks());
    assert_eq!(facade.latest_tag_commit("v1.0.0").unwrap(), commit);
    assert!(facade.latest_tag_commit("v9.9.9").is_err());
}

#[test]
fn checksum_is_identical_across_clones() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "src/main.go", "package main\n");
    write_file(dir.path(), "README.md", "# demo\n");
    let commit = commit_all(&repo, "first");
    drop(repo);

    let clone_a = tempfile::tempdir().unwrap();
    let clone_b = tempfile::tempdir().unwrap();
    let src = dir.path().to_string_lossy().to_string();
    git2::Repository::clone(&src, clone_a.path().join("repo")).unwrap();
    git2::Repository::clone(&src, clone_b.path().join("repo")).unwrap();

    let facade_a = LocalGitRepo::new("a", clone_a.path().join("repo"), locks());
    let facade_b = LocalGitRepo::new("b", clone_b.path().join("repo"), locks());

    let opts = checksum_opts(&commit, &["src/**/*.go", "README.md"]);
    let checksum_a = facade_a.checksum(&opts).unwrap();
    let checksum_b = facade_b.checksum(&opts).unwrap();

    assert_eq!(checksum_a.digest(), checksum_b.digest());
    assert!(checksum_a.no_match_paths.is_empty());
}

#[test]
fn checksum_records_unmatched_patterns() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "README.md", "# demo\n");
    let commit = commit_all(&repo, "first");
    drop(repo);

    let facade = LocalGitRepo::new("own", dir.path(), locks());
    let checksum = facade.checksum(&checksum_opts(&commit, &["README.md", "lib/**/*.c"])).unwrap();

    assert_eq!(checksum.no_match_paths, vec!["lib/**/*.c".to_string()]);
}

#[test]
fn archive_contains_the_filtered_commit_tree() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "src/app.go", "package app\n");
    write_file(dir.path(), "src/vendor/dep.go", "package dep\n");
    write_file(dir.path(), "docs/guide.md", "# guide\n");
    let commit = commit_all(&repo, "first");
    drop(repo);

    let facade = LocalGitRepo::new("own", dir.path(), locks());
    let archive = facade
        .create_archive(&ArchiveOptions {
            commit,
            base_path: String::new(),
            include_paths: vec!["src".to_string()],
            exclude_paths: vec!["src/vendor".to_string()],
        })
        .unwrap();

    let file = std::fs::File::open(archive.path()).unwrap();
    let mut reader = tar::Archive::new(file);
    let names: Vec<String> = reader
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();

    assert_eq!(names, vec!["src/app.go".to_string()]);
}

#[test]
fn patch_describes_touched_paths() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "src/app.go", "package app\n");
    write_file(dir.path(), "docs/guide.md", "# guide\n");
    let from = commit_all(&repo, "first");

    write_file(dir.path(), "src/app.go", "package app\n\nfunc main() {}\n");
    write_file(dir.path(), "docs/guide.md", "# guide\n\nmore\n");
    let to = commit_all(&repo, "second");
    drop(repo);

    let facade = LocalGitRepo::new("own", dir.path(), locks());
    let patch = facade
        .create_patch(&PatchOptions {
            from_commit: from,
            to_commit: to,
            base_path: String::new(),
            include_paths: vec!["src".to_string()],
            exclude_paths: vec![],
            with_entire_file_context: false,
            with_binary: false,
        })
        .unwrap();

    assert_eq!(patch.descriptor.paths, vec!["src/app.go".to_string()]);
    assert!(!patch.descriptor.binary);
    assert!(!patch.is_empty());

    let body = std::fs::read_to_string(patch.path()).unwrap();
    assert!(body.contains("func main()"));
    assert!(!body.contains("guide"));
}

#[test]
fn remote_repo_clones_fetches_and_resolves_head() {
    let origin_dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(origin_dir.path());
    write_file(origin_dir.path(), "a.txt", "one");
    let first = commit_all(&repo, "first");

    let url = format!("file://{}", origin_dir.path().display());
    let remote = RemoteGitRepo::open("widgets", url, locks()).unwrap();
    remote.clone_and_fetch().unwrap();

    assert_eq!(remote.head_commit().unwrap(), first);
    assert!(remote.is_commit_exists(&first).unwrap());

    // New upstream commit is visible after the next fetch.
    write_file(origin_dir.path(), "a.txt", "two");
    let second = commit_all(&repo, "second");
    remote.clone_and_fetch().unwrap();

    assert_eq!(remote.head_commit().unwrap(), second);

    let branch = remote.head_branch_name().unwrap();
    assert_eq!(remote.latest_branch_commit(&branch).unwrap(), second);

    // Tracking refs mirror the origin's branch set.
    assert_eq!(remote.remote_branches_list().unwrap(), vec![branch]);
}

#[test]
fn tags_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_git_repo(dir.path());
    write_file(dir.path(), "a.txt", "one");
    let commit = commit_all(&repo, "first");

    let object = repo.find_object(git2::Oid::from_str(&commit).unwrap(), None).unwrap();
    repo.tag_lightweight("v0.1.0", &object, false).unwrap();
    repo.tag_lightweight("v0.2.0", &object, false).unwrap();
    drop(object);
    drop(repo);

    let facade = LocalGitRepo::new("own", dir.path(), locks());
    let mut tags = facade.tags_list().unwrap();
    tags.sort();
    assert_eq!(tags, vec!["v0.1.0".to_string(), "v0.2.0".to_string()]);
}
