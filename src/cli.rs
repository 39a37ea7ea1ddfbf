// src/cli.rs

//! Command-line interface

use crate::arch::Arch;
use crate::build::chroot::HostChrootProvider;
use crate::build::orchestrator::Orchestrator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::recipe::registry::Registry;
use crate::recipe::tree::{self, CleanTarget};
use crate::recipe::{PkgbuildParser, parser};
use crate::repository::distro::local_distro;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Cross-architecture package build orchestrator", long_about = None)]
pub struct Cli {
    /// Configuration file (default: the per-user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build packages (and their dependencies) by path or name
    ///
    /// Paths are relative to the PKGBUILDs tree, e.g. "cross/crossdirect".
    /// Packages with an exact version match on the mirror are downloaded
    /// instead of built unless --no-download is given.
    Build {
        /// Rebuild even if the package is already built
        #[arg(long)]
        force: bool,
        /// The CPU architecture to build for
        #[arg(long)]
        arch: Option<Arch>,
        /// Also rebuild packages that depend on the packages being built
        #[arg(long)]
        rebuild_dependants: bool,
        /// Never download packages from the mirror before building
        #[arg(long)]
        no_download: bool,
        paths: Vec<String>,
    },
    /// Update the PKGBUILDs tree from git
    Update {
        #[arg(long)]
        non_interactive: bool,
    },
    /// Build packages, then copy and install them on a device over SSH
    Sideload {
        /// The CPU architecture to build for
        #[arg(long)]
        arch: Option<Arch>,
        /// Skip building; just copy and install what is already there
        #[arg(short = 'B', long)]
        no_build: bool,
        paths: Vec<String>,
    },
    /// Remove files not tracked in the PKGBUILDs tree
    Clean {
        /// Don't prompt for confirmation
        #[arg(short, long)]
        force: bool,
        /// Print what would be removed without removing anything
        #[arg(short, long)]
        noop: bool,
        /// What to remove: all, src, pkg (defaults to all)
        what: Vec<String>,
    },
    /// List discovered recipes
    List,
    /// Check that the given PKGBUILDs are well-formed
    Check { paths: Vec<String> },
}

pub fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Build {
            force,
            arch,
            rebuild_dependants,
            no_download,
            paths,
        } => cmd_build(&config, &paths, arch, force, rebuild_dependants, !no_download),
        Commands::Update { non_interactive } => tree::update(&config, !non_interactive),
        Commands::Sideload {
            arch,
            no_build,
            paths,
        } => cmd_sideload(&config, &paths, arch, no_build),
        Commands::Clean { force, noop, what } => cmd_clean(&config, &what, force, noop),
        Commands::List => cmd_list(&config),
        Commands::Check { paths } => cmd_check(&config, &paths),
    }
}

/// Fail early when a required host tool is missing from PATH
fn preflight(tools: &[&str]) -> Result<()> {
    for tool in tools {
        which::which(tool).map_err(|_| {
            Error::ConfigError(format!("Required tool {} not found in PATH", tool))
        })?;
    }
    Ok(())
}

fn cmd_build(
    config: &Config,
    paths: &[String],
    arch: Option<Arch>,
    force: bool,
    rebuild_dependants: bool,
    try_download: bool,
) -> Result<()> {
    preflight(&["git", "repo-add", "pacstrap", "arch-chroot"])?;
    let provider = HostChrootProvider::new(config);
    let orchestrator = Orchestrator::new(config, &provider);
    let files = orchestrator.build(paths, arch, force, rebuild_dependants, try_download)?;
    for file in &files {
        println!("{}", file.display());
    }
    Ok(())
}

fn cmd_sideload(
    config: &Config,
    paths: &[String],
    arch: Option<Arch>,
    no_build: bool,
) -> Result<()> {
    preflight(&["scp", "ssh"])?;
    if !no_build {
        preflight(&["git", "repo-add", "pacstrap", "arch-chroot"])?;
        let provider = HostChrootProvider::new(config);
        Orchestrator::new(config, &provider).build(paths, arch, false, false, true)?;
    }
    let arch = arch.unwrap_or(Arch::Aarch64);

    let mut distro = local_distro(config, arch, true)?;
    let files: Vec<String> = distro
        .merged_records()?
        .values()
        .filter(|record| paths.contains(&record.name))
        .filter_map(|record| {
            record
                .resolved_url
                .as_deref()
                .and_then(|url| url.strip_prefix("file://"))
                .map(|dir| format!("{}/{}", dir, record.filename))
        })
        .collect();
    debug!("Sideload: found package files: {:?}", files);
    if files.is_empty() {
        return Err(Error::DiscoveryError(
            "No packages matched for sideloading".to_string(),
        ));
    }

    let destination = format!("{}@{}", config.sideload.user, config.sideload.host);
    let port = config.sideload.port.to_string();
    info!("Copying {} package(s) to {}", files.len(), destination);
    let status = Command::new("scp")
        .args(["-P", &port])
        .args(&files)
        .arg(format!("{}:/tmp", destination))
        .status()
        .map_err(|e| Error::IoError(format!("Failed to run scp: {}", e)))?;
    if !status.success() {
        return Err(Error::IoError("Failed to copy packages to device".to_string()));
    }

    let remote_files: Vec<String> = files
        .iter()
        .filter_map(|f| f.rsplit('/').next())
        .map(|name| format!("/tmp/{}", name))
        .collect();
    let mut install = vec![
        "sudo".to_string(),
        "pacman".to_string(),
        "-U".to_string(),
    ];
    install.extend(remote_files);
    install.push("--noconfirm".to_string());
    install.push("--overwrite=*".to_string());
    let status = Command::new("ssh")
        .args(["-t", "-p", &port, &destination])
        .args(&install)
        .status()
        .map_err(|e| Error::IoError(format!("Failed to run ssh: {}", e)))?;
    if !status.success() {
        return Err(Error::IoError("Failed to install packages on device".to_string()));
    }
    Ok(())
}

fn cmd_clean(config: &Config, what: &[String], force: bool, noop: bool) -> Result<()> {
    let targets: Vec<CleanTarget> = if what.is_empty() {
        vec![CleanTarget::All]
    } else {
        what.iter()
            .map(|w| w.parse())
            .collect::<Result<Vec<_>>>()?
    };
    tree::clean(config, &targets, force, noop)
}

fn cmd_list(config: &Config) -> Result<()> {
    tree::ensure_cloned(config)?;
    info!("Discovering packages");
    let parser = PkgbuildParser::new(config.pkgbuilds_dir());
    let registry = Registry::discover(config, &parser)?;
    for id in registry.unique_ids() {
        let recipe = registry.recipe(id);
        println!(
            "name: {}; ver: {}; provides: {:?}; replaces: {:?}; local_depends: {:?}; depends: {:?}",
            recipe.name,
            recipe.version,
            recipe.provides,
            recipe.replaces,
            recipe.local_depends,
            recipe.depends,
        );
    }
    Ok(())
}

fn cmd_check(config: &Config, paths: &[String]) -> Result<()> {
    tree::ensure_cloned(config)?;
    let pkgbuild_parser = PkgbuildParser::new(config.pkgbuilds_dir());
    let registry = Registry::discover(config, &pkgbuild_parser)?;
    let selected = registry.filter_by_paths(paths, false)?;

    let arches: Vec<&str> = Arch::ALL.iter().map(|a| a.name()).collect();
    let mut clean = true;
    let recipe_paths: BTreeSet<&str> = selected
        .iter()
        .map(|&id| registry.recipe(id).path.as_str())
        .collect();
    for recipe_path in recipe_paths {
        let pkgbuild = config.pkgbuilds_dir().join(recipe_path).join("PKGBUILD");
        let problems = parser::lint(&pkgbuild, &arches)?;
        if problems.is_empty() {
            info!("{} nicely formatted!", recipe_path);
        } else {
            clean = false;
            for problem in problems {
                eprintln!("{}: {}", recipe_path, problem);
            }
        }
    }
    if !clean {
        return Err(Error::DiscoveryError(
            "Some PKGBUILDs have formatting problems".to_string(),
        ));
    }
    Ok(())
}
