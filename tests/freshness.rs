// tests/freshness.rs

//! Freshness oracle scenarios: local hits, mirror downloads, any-arch
//! sharing. The mirror is served over file:// URLs and repo-add is a stub,
//! so everything runs offline.

mod common;

use common::{MockProvider, stub_repo_add, test_config, write_index};
use kiln::Publisher;
use kiln::arch::Arch;
use kiln::build::chroot::ChrootProvider;
use kiln::build::freshness::{BuiltProbe, FreshnessOracle};
use kiln::recipe::{BuildMode, Recipe};

fn recipe(name: &str, repo: &str, version: &str) -> Recipe {
    Recipe {
        name: name.to_string(),
        path: format!("{}/{}", repo, name),
        repo: repo.to_string(),
        version: version.to_string(),
        depends: Vec::new(),
        provides: Vec::new(),
        replaces: Vec::new(),
        mode: BuildMode::Host,
        local_depends: Vec::new(),
    }
}

#[test]
fn test_local_artifact_counts_as_built() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let publisher = Publisher::with_repo_add(&config, stub_repo_add(tmp.path()));

    let artifact = "tool-1.0-1-x86_64.pkg.tar.zst";
    let repo_dir = tmp.path().join("packages/x86_64/main");
    std::fs::create_dir_all(&repo_dir).unwrap();
    std::fs::write(repo_dir.join(artifact), b"artifact").unwrap();

    let provider = MockProvider::new().with_package_list("main/tool", &[artifact]);
    let mut native = provider.get(Arch::X86_64, true).unwrap();
    let mut oracle = FreshnessOracle::new(&config, &publisher, native.as_mut());

    let built = oracle
        .is_built(&recipe("tool", "main", "1.0-1"), Arch::X86_64, false)
        .unwrap();
    assert!(built);
    // found artifacts are (re)imported into the repo database
    assert!(common::repo_add_log(tmp.path()).contains(artifact));
}

#[test]
fn test_missing_artifact_means_unbuilt() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let publisher = Publisher::with_repo_add(&config, stub_repo_add(tmp.path()));

    let provider =
        MockProvider::new().with_package_list("main/tool", &["tool-1.0-1-x86_64.pkg.tar.zst"]);
    let mut native = provider.get(Arch::X86_64, true).unwrap();
    let mut oracle = FreshnessOracle::new(&config, &publisher, native.as_mut());

    let built = oracle
        .is_built(&recipe("tool", "main", "1.0-1"), Arch::X86_64, false)
        .unwrap();
    assert!(!built);
}

#[test]
fn test_all_artifacts_must_be_present() {
    // a split package with one of two artifacts on disk is not built
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let publisher = Publisher::with_repo_add(&config, stub_repo_add(tmp.path()));

    let repo_dir = tmp.path().join("packages/x86_64/main");
    std::fs::create_dir_all(&repo_dir).unwrap();
    std::fs::write(repo_dir.join("tool-1.0-1-x86_64.pkg.tar.zst"), b"a").unwrap();

    let provider = MockProvider::new().with_package_list(
        "main/tool",
        &[
            "tool-1.0-1-x86_64.pkg.tar.zst",
            "tool-extras-1.0-1-x86_64.pkg.tar.zst",
        ],
    );
    let mut native = provider.get(Arch::X86_64, true).unwrap();
    let mut oracle = FreshnessOracle::new(&config, &publisher, native.as_mut());

    let built = oracle
        .is_built(&recipe("tool", "main", "1.0-1"), Arch::X86_64, false)
        .unwrap();
    assert!(!built);
}

#[test]
fn test_remote_exact_match_is_downloaded() {
    // the mirror advertises the exact (name, version, filename); the file
    // appears locally and the recipe counts as built without building
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    let mirror_root = tmp.path().join("mirror");
    config.mirror.url_template = format!("file://{}/$arch/$repo", mirror_root.display());
    let publisher = Publisher::with_repo_add(&config, stub_repo_add(tmp.path()));

    let artifact = "tool-1.0-1-x86_64.pkg.tar.zst";
    let mirror_repo = mirror_root.join("x86_64/main");
    write_index(&mirror_repo.join("main.db"), &[("tool", "1.0-1", artifact)]);
    std::fs::write(mirror_repo.join(artifact), b"mirror artifact").unwrap();

    let provider = MockProvider::new().with_package_list("main/tool", &[artifact]);
    let mut native = provider.get(Arch::X86_64, true).unwrap();
    let mut oracle = FreshnessOracle::new(&config, &publisher, native.as_mut());

    let built = oracle
        .is_built(&recipe("tool", "main", "1.0-1"), Arch::X86_64, true)
        .unwrap();
    assert!(built);

    let local = tmp.path().join("packages/x86_64/main").join(artifact);
    assert!(local.exists());
    assert_eq!(std::fs::read(&local).unwrap(), b"mirror artifact");
}

#[test]
fn test_remote_version_mismatch_is_not_downloadable() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    let mirror_root = tmp.path().join("mirror");
    config.mirror.url_template = format!("file://{}/$arch/$repo", mirror_root.display());
    let publisher = Publisher::with_repo_add(&config, stub_repo_add(tmp.path()));

    let artifact = "tool-1.0-1-x86_64.pkg.tar.zst";
    write_index(
        &mirror_root.join("x86_64/main/main.db"),
        &[("tool", "2.0-1", "tool-2.0-1-x86_64.pkg.tar.zst")],
    );

    let provider = MockProvider::new().with_package_list("main/tool", &[artifact]);
    let mut native = provider.get(Arch::X86_64, true).unwrap();
    let mut oracle = FreshnessOracle::new(&config, &publisher, native.as_mut());

    let built = oracle
        .is_built(&recipe("tool", "main", "1.0-1"), Arch::X86_64, true)
        .unwrap();
    assert!(!built);
}

#[test]
fn test_unavailable_mirror_is_consumed_as_not_built() {
    // no mirror tree on disk at all: the scan fails, the failure is
    // swallowed, and the answer is simply "build it"
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.mirror.url_template =
        format!("file://{}/missing/$arch/$repo", tmp.path().display());
    let publisher = Publisher::with_repo_add(&config, stub_repo_add(tmp.path()));

    let provider =
        MockProvider::new().with_package_list("main/tool", &["tool-1.0-1-x86_64.pkg.tar.zst"]);
    let mut native = provider.get(Arch::X86_64, true).unwrap();
    let mut oracle = FreshnessOracle::new(&config, &publisher, native.as_mut());

    let built = oracle
        .is_built(&recipe("tool", "main", "1.0-1"), Arch::X86_64, true)
        .unwrap();
    assert!(!built);
}

#[test]
fn test_any_arch_artifact_is_shared_across_arches() {
    // the artifact exists only under x86_64; checking aarch64 borrows it,
    // copies it into every arch repo, and reports built
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let publisher = Publisher::with_repo_add(&config, stub_repo_add(tmp.path()));

    let artifact = "docs-1.0-1-any.pkg.tar.xz";
    let x86_repo = tmp.path().join("packages/x86_64/main");
    std::fs::create_dir_all(&x86_repo).unwrap();
    std::fs::write(x86_repo.join(artifact), b"docs").unwrap();

    let provider = MockProvider::new().with_package_list("main/docs", &[artifact]);
    let mut native = provider.get(Arch::X86_64, true).unwrap();
    let mut oracle = FreshnessOracle::new(&config, &publisher, native.as_mut());

    let built = oracle
        .is_built(&recipe("docs", "main", "1.0-1"), Arch::Aarch64, false)
        .unwrap();
    assert!(built);

    for arch in Arch::ALL {
        let copy = tmp
            .path()
            .join("packages")
            .join(arch.name())
            .join("main")
            .join(artifact);
        assert!(copy.exists(), "missing any-arch copy for {}", arch);
    }
    // the borrowing arch's repo was re-indexed with the shared artifact
    let log = common::repo_add_log(tmp.path());
    assert!(log.contains("packages/aarch64/main/main.db.tar.xz"));
    assert!(log.contains(artifact));

    // second check is a no-op hit (freshness is idempotent)
    let again = oracle
        .is_built(&recipe("docs", "main", "1.0-1"), Arch::Aarch64, false)
        .unwrap();
    assert!(again);
}
