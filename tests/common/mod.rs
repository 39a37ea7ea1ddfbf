// tests/common/mod.rs

//! Shared fixtures: a mock build chroot, a stub repo-add, and helpers for
//! building recipe trees and repository indices on disk.

#![allow(dead_code)]

use kiln::Result;
use kiln::arch::Arch;
use kiln::build::chroot::{BuildChroot, ChrootProvider, CmdResult};
use kiln::config::Config;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A `BuildChroot` that records every call and serves canned
/// `--packagelist` answers instead of running makepkg.
pub struct MockChroot {
    name: String,
    arch: Arch,
    path: PathBuf,
    log: Arc<Mutex<Vec<String>>>,
    package_lists: HashMap<String, Vec<String>>,
}

impl MockChroot {
    fn record(&self, line: String) {
        self.log.lock().unwrap().push(line);
    }
}

impl BuildChroot for MockChroot {
    fn name(&self) -> &str {
        &self.name
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn initialize(&mut self, reset: bool) -> Result<()> {
        self.record(format!("{}: initialize reset={}", self.name, reset));
        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        self.record(format!("{}: activate", self.name));
        Ok(())
    }

    fn mount_packages(&mut self) -> Result<()> {
        self.record(format!("{}: mount packages", self.name));
        Ok(())
    }

    fn mount_pacman_cache(&mut self) -> Result<()> {
        self.record(format!("{}: mount pacman cache", self.name));
        Ok(())
    }

    fn mount_pkgbuilds(&mut self) -> Result<()> {
        self.record(format!("{}: mount pkgbuilds", self.name));
        Ok(())
    }

    fn mount_crosscompile(&mut self, target: &dyn BuildChroot) -> Result<()> {
        self.record(format!(
            "{}: mount crosscompile /chroot/{}",
            self.name,
            target.name()
        ));
        Ok(())
    }

    fn mount_crossdirect(&mut self, native: &dyn BuildChroot) -> Result<()> {
        self.record(format!(
            "{}: mount crossdirect /native ({})",
            self.name,
            native.name()
        ));
        Ok(())
    }

    fn write_pacman_conf(&mut self) -> Result<()> {
        self.record(format!("{}: write pacman.conf", self.name));
        Ok(())
    }

    fn write_makepkg_conf(
        &mut self,
        target_arch: Arch,
        cross_chroot_relative: &str,
        cross: bool,
    ) -> Result<String> {
        self.record(format!(
            "{}: write makepkg.conf target={} rel={} cross={}",
            self.name, target_arch, cross_chroot_relative, cross
        ));
        Ok(if cross {
            format!("etc/makepkg-cross-{}.conf", target_arch)
        } else {
            "etc/makepkg.conf".to_string()
        })
    }

    fn try_install_packages(
        &mut self,
        packages: &[String],
        allow_fail: bool,
    ) -> Result<HashMap<String, CmdResult>> {
        self.record(format!(
            "{}: install [{}] allow_fail={}",
            self.name,
            packages.join(", "),
            allow_fail
        ));
        Ok(packages
            .iter()
            .map(|p| (p.clone(), CmdResult::default()))
            .collect())
    }

    fn run_cmd(
        &mut self,
        script: &str,
        cwd: Option<&str>,
        _env: &HashMap<String, String>,
        _capture_output: bool,
    ) -> Result<CmdResult> {
        self.record(format!(
            "{}: run [{}] {}",
            self.name,
            cwd.unwrap_or("/"),
            script
        ));
        let mut result = CmdResult::default();
        if script.contains("--packagelist") {
            if let Some(recipe_path) = cwd.and_then(|c| c.strip_prefix("/pkgbuilds/")) {
                if let Some(lines) = self.package_lists.get(recipe_path) {
                    result.stdout = lines.join("\n");
                }
            }
        }
        Ok(result)
    }
}

/// Provider handing out `MockChroot`s that share one call log
#[derive(Default)]
pub struct MockProvider {
    pub log: Arc<Mutex<Vec<String>>>,
    pub package_lists: HashMap<String, Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `artifacts` as the packagelist answer for `recipe_path`
    pub fn with_package_list(mut self, recipe_path: &str, artifacts: &[&str]) -> Self {
        self.package_lists.insert(
            recipe_path.to_string(),
            artifacts.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl ChrootProvider for MockProvider {
    fn get(&self, arch: Arch, _add_local_repos: bool) -> Result<Box<dyn BuildChroot>> {
        Ok(Box::new(MockChroot {
            name: format!("build_{}", arch),
            arch,
            path: PathBuf::from(format!("/tmp/kiln-mock/{}", arch)),
            log: Arc::clone(&self.log),
            package_lists: self.package_lists.clone(),
        }))
    }
}

/// Config rooted in a scratch directory with a single `main` repo plus the
/// `cross` repo used by the helper recipes.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.pkgbuilds = root.join("pkgbuilds");
    config.paths.packages = root.join("packages");
    config.paths.pacman = root.join("pacman");
    config.paths.chroots = root.join("chroot");
    config.pkgbuilds.repositories = vec!["main".to_string(), "cross".to_string()];
    config.runtime.arch = Some(Arch::X86_64);
    config
}

/// Write a stub repo-add that logs its arguments and touches the database
pub fn stub_repo_add(dir: &Path) -> PathBuf {
    let path = dir.join("repo-add");
    std::fs::write(
        &path,
        "#!/bin/sh\necho \"$@\" >> \"$(dirname \"$0\")/repo-add.log\"\ntouch \"$2\"\n",
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn repo_add_log(dir: &Path) -> String {
    std::fs::read_to_string(dir.join("repo-add.log")).unwrap_or_default()
}

/// Write a PKGBUILD under `<pkgbuilds>/<rel_path>/`
pub fn write_pkgbuild(config: &Config, rel_path: &str, body: &str) {
    let dir = config.paths.pkgbuilds.join(rel_path);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("PKGBUILD"), body).unwrap();
}

/// Minimal well-formed PKGBUILD body
pub fn pkgbuild_body(name: &str, version: &str, depends: &[&str]) -> String {
    let (pkgver, pkgrel) = version.split_once('-').unwrap();
    let mut body = format!(
        "_mode=host\npkgname={}\npkgver={}\npkgrel={}\narch=(x86_64 aarch64)\nlicense=(MIT)\n",
        name, pkgver, pkgrel
    );
    if !depends.is_empty() {
        body.push_str(&format!("depends=({})\n", depends.join(" ")));
    }
    body
}

/// Build a gzip-compressed pacman database at `path` from (name, version,
/// filename) records, the way repo-add lays it out.
pub fn write_index(path: &Path, entries: &[(&str, &str, &str)]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = std::fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, version, filename) in entries {
        let desc = format!(
            "%FILENAME%\n{}\n\n%NAME%\n{}\n\n%VERSION%\n{}\n",
            filename, name, version
        );
        let mut header = tar::Header::new_gnu();
        header.set_size(desc.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                format!("{}-{}/desc", name, version),
                desc.as_bytes(),
            )
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}
