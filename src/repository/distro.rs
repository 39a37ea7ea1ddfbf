// src/repository/distro.rs

//! A distro is the set of package repositories for one architecture
//!
//! Factories exist for the two distros the orchestrator talks to: the HTTPS
//! mirror (candidate downloads) and the local on-disk repos (published
//! artifacts). Repos overlay in their configured order; when two repos carry
//! the same package name, the later repo wins.

use crate::arch::Arch;
use crate::config::Config;
use crate::error::Result;
use crate::repository::index::{RepoIndex, RepoRecord};
use std::collections::HashMap;

#[derive(Debug)]
pub struct Distro {
    pub arch: Arch,
    repos: Vec<RepoIndex>,
}

impl Distro {
    /// Build a distro over `repo_names` (in overlay order) sharing one URL
    /// template. `scan` eagerly fetches every index.
    pub fn new<S: AsRef<str>>(
        arch: Arch,
        repo_names: &[S],
        url_template: &str,
        scan: bool,
    ) -> Result<Distro> {
        let mut distro = Distro {
            arch,
            repos: repo_names
                .iter()
                .map(|name| RepoIndex::new(name.as_ref(), arch, url_template))
                .collect(),
        };
        if scan {
            distro.scan_all()?;
        }
        Ok(distro)
    }

    pub fn scan_all(&mut self) -> Result<()> {
        for repo in &mut self.repos {
            repo.scan()?;
        }
        Ok(())
    }

    pub fn repo_names(&self) -> Vec<&str> {
        self.repos.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn repo_mut(&mut self, name: &str) -> Option<&mut RepoIndex> {
        self.repos.iter_mut().find(|r| r.name == name)
    }

    /// All packages across the distro's repos, overlaid in configured order
    /// (later repos win on name conflicts).
    pub fn merged_records(&mut self) -> Result<HashMap<String, RepoRecord>> {
        let mut merged = HashMap::new();
        for repo in &mut self.repos {
            for (name, record) in repo.scan()? {
                merged.insert(name.clone(), record.clone());
            }
        }
        Ok(merged)
    }
}

/// The HTTPS mirror distro for `arch`.
pub fn remote_distro(config: &Config, arch: Arch, scan: bool) -> Result<Distro> {
    Distro::new(arch, config.repositories(), &config.mirror.url_template, scan)
}

/// The local on-disk distro for `arch`, rooted at the packages directory.
pub fn local_distro(config: &Config, arch: Arch, scan: bool) -> Result<Distro> {
    let template = format!("file://{}/$arch/$repo", config.paths.packages.display());
    Distro::new(arch, config.repositories(), &template, scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::index::tests::write_index;

    #[test]
    fn test_overlay_later_repo_wins() {
        let tmp = tempfile::tempdir().unwrap();
        for repo in ["core", "extra"] {
            std::fs::create_dir_all(tmp.path().join("aarch64").join(repo)).unwrap();
        }
        write_index(
            &tmp.path().join("aarch64/core/core.db"),
            &[
                ("foo", "1.0-1", "foo-1.0-1-aarch64.pkg.tar.zst"),
                ("only-core", "1.0-1", "only-core-1.0-1-aarch64.pkg.tar.zst"),
            ],
        );
        write_index(
            &tmp.path().join("aarch64/extra/extra.db"),
            &[("foo", "2.0-1", "foo-2.0-1-aarch64.pkg.tar.zst")],
        );

        let template = format!("file://{}/$arch/$repo", tmp.path().display());
        let mut distro = Distro::new(
            Arch::Aarch64,
            &["core", "extra"],
            &template,
            false,
        )
        .unwrap();

        let merged = distro.merged_records().unwrap();
        assert_eq!(merged.len(), 2);
        // extra overlays core
        assert_eq!(merged["foo"].version, "2.0-1");
        assert_eq!(merged["only-core"].version, "1.0-1");
    }

    #[test]
    fn test_repo_lookup() {
        let distro = Distro::new(
            Arch::X86_64,
            &["main"],
            "https://mirror.example.org/$arch/$repo",
            false,
        )
        .unwrap();
        assert_eq!(distro.repo_names(), vec!["main"]);
    }
}
