// src/build/orchestrator.rs

//! Top-level build flow: discover, plan, execute, publish
//!
//! Levels run strictly in order; every level is fully published before the
//! next one starts, so later levels can install their freshly built
//! dependencies straight from the local repos. Within a level the order is
//! arbitrary.

use crate::arch::Arch;
use crate::build::chroot::ChrootProvider;
use crate::build::freshness::FreshnessOracle;
use crate::build::{BuildOptions, CROSSDIRECT_PKGS, QEMU_BINFMT_PKGS, binfmt, executor, planner};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::recipe::registry::{RecipeId, Registry};
use crate::recipe::{PkgbuildParser, tree};
use crate::repository::publish::Publisher;
use std::path::PathBuf;
use std::process::Command;
use tracing::info;

pub struct Orchestrator<'a> {
    config: &'a Config,
    provider: &'a dyn ChrootProvider,
    publisher: Publisher<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, provider: &'a dyn ChrootProvider) -> Self {
        Self {
            config,
            provider,
            publisher: Publisher::new(config),
        }
    }

    /// Substitute the publisher (tests use a stubbed `repo-add`)
    pub fn with_publisher(
        config: &'a Config,
        provider: &'a dyn ChrootProvider,
        publisher: Publisher<'a>,
    ) -> Self {
        Self {
            config,
            provider,
            publisher,
        }
    }

    /// Entry point for the `build` command. Returns the published files.
    pub fn build(
        &self,
        paths: &[String],
        arch: Option<Arch>,
        force: bool,
        rebuild_dependants: bool,
        try_download: bool,
    ) -> Result<Vec<PathBuf>> {
        let arch = arch.unwrap_or(Arch::Aarch64);
        let host = self.config.host_arch()?;

        tree::ensure_cloned(self.config)?;
        let parser = PkgbuildParser::new(self.config.pkgbuilds_dir());
        let registry = Registry::discover(self.config, &parser)?;
        if registry.is_empty() {
            return Err(Error::DiscoveryError(
                "No recipes found in the PKGBUILDs tree".to_string(),
            ));
        }

        if arch != host {
            self.enable_foreign_builds(arch, &registry)?;
        }
        self.publisher.init_repos(arch)?;
        self.publisher.init_repos(host)?;

        let requested = registry.filter_by_paths(paths, false)?;
        self.build_recipes(
            &registry,
            &requested,
            arch,
            force,
            rebuild_dependants,
            try_download,
            &BuildOptions::from_config(self.config),
        )
    }

    /// Plan and run the builds for `requested`, publishing level by level.
    fn build_recipes(
        &self,
        registry: &Registry,
        requested: &[RecipeId],
        arch: Arch,
        force: bool,
        rebuild_dependants: bool,
        try_download: bool,
        opts: &BuildOptions,
    ) -> Result<Vec<PathBuf>> {
        let host = self.config.host_arch()?;
        let mut native = executor::setup_chroot(
            self.config,
            self.provider,
            &self.publisher,
            host,
            &[],
            false,
            true,
        )?;

        let levels = {
            let mut oracle = FreshnessOracle::new(self.config, &self.publisher, native.as_mut());
            planner::unbuilt_levels(
                registry,
                requested,
                arch,
                force,
                rebuild_dependants,
                try_download,
                &mut oracle,
            )?
        };
        if levels.is_empty() {
            info!("Everything built already");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for (level, ids) in levels.iter().enumerate() {
            let names: Vec<&str> = ids
                .iter()
                .map(|&id| registry.recipe(id).name.as_str())
                .collect();
            info!("(Level {}) Building {}", level, names.join(", "));
            for &id in ids {
                let recipe = registry.recipe(id);
                executor::build_recipe(
                    self.config,
                    self.provider,
                    &self.publisher,
                    recipe,
                    arch,
                    opts,
                )?;
                files.extend(self.publisher.add_recipe_artifacts(recipe, arch)?);
            }
        }
        Ok(files)
    }

    /// Make foreign-arch builds possible: build the cross helper recipes
    /// natively, install the qemu binfmt packages, register the handlers.
    fn enable_foreign_builds(&self, arch: Arch, registry: &Registry) -> Result<()> {
        info!("Installing qemu user emulation (building if necessary)");
        let host = self.config.host_arch()?;

        let helper_paths: Vec<String> = CROSSDIRECT_PKGS
            .iter()
            .map(|pkg| format!("cross/{}", pkg))
            .collect();
        let requested = registry.filter_by_paths(&helper_paths, false)?;
        self.build_recipes(
            registry,
            &requested,
            host,
            false,
            false,
            true,
            &BuildOptions::plain(self.config.threads()),
        )?;

        // the binfmt packages go into the native chroot's root so the
        // handlers' interpreters exist on the host side
        let chroot = executor::setup_chroot(
            self.config,
            self.provider,
            &self.publisher,
            host,
            &[],
            false,
            true,
        )?;
        let pacman_conf = chroot.path().join("etc/pacman.conf");
        let status = Command::new("pacman")
            .args(["-Syy", "--noconfirm", "--needed", "--config"])
            .arg(&pacman_conf)
            .args(QEMU_BINFMT_PKGS)
            .status()
            .map_err(|e| Error::BuildError(format!("Failed to run pacman: {}", e)))?;
        if !status.success() {
            return Err(Error::BuildError(
                "Failed to install qemu binfmt packages".to_string(),
            ));
        }

        binfmt::register(arch)
    }
}
