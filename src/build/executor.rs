// src/build/executor.rs

//! Build execution for a single (recipe, arch)
//!
//! Three ways to produce a foreign package, picked in order of preference:
//! cross-compilation in the native chroot (recipe opted in via its mode and
//! config allows it), host-compilation inside the emulated target chroot
//! with crossdirect redirecting compiler invocations to native binaries, or
//! a plain emulated build. Native targets always build directly in the
//! target chroot.

use crate::arch::Arch;
use crate::build::chroot::{BuildChroot, ChrootProvider};
use crate::build::{BuildOptions, CROSSDIRECT_PKGS};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::recipe::{BuildMode, Recipe};
use crate::repository::publish::Publisher;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Environment variable prefixes stripped from the build environment
const STRIPPED_ENV_PREFIXES: [&str; 3] = ["CI", "GITLAB", "FF"];

/// The environment a makepkg invocation runs under: the host environment
/// minus CI leakage, pinned locale, job counts, and the emulator loader
/// prefix for the target's toolchain.
pub fn makepkg_env(threads: usize, target: Arch) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(key, _)| {
            let prefix = key.split('_').next().unwrap_or(key);
            !STRIPPED_ENV_PREFIXES.contains(&prefix)
        })
        .collect();
    env.insert("LANG".to_string(), "C".to_string());
    env.insert("CARGO_BUILD_JOBS".to_string(), threads.to_string());
    env.insert("MAKEFLAGS".to_string(), format!("-j{}", threads));
    env.insert(
        "QEMU_LD_PREFIX".to_string(),
        format!("/usr/{}", target.triple()),
    );
    env
}

fn prepend_path(env: &mut HashMap<String, String>, prefix: &str) {
    let path = env.get("PATH").cloned().unwrap_or_default();
    env.insert("PATH".to_string(), format!("{}:{}", prefix, path));
}

/// Prepare a ready-to-use build root for `arch`: local repos initialised,
/// chroot bootstrapped and activated, caches and the recipes tree mounted,
/// extra packages installed.
pub fn setup_chroot(
    config: &Config,
    provider: &dyn ChrootProvider,
    publisher: &Publisher,
    arch: Arch,
    extra_packages: &[String],
    clean: bool,
    add_local_repos: bool,
) -> Result<Box<dyn BuildChroot>> {
    publisher.init_repos(arch)?;
    let mut chroot = provider.get(arch, add_local_repos)?;
    chroot.mount_packages()?;
    debug!("Initializing {} build chroot", arch);
    chroot.initialize(clean)?;
    chroot.write_pacman_conf()?;
    chroot.activate()?;
    chroot.mount_pacman_cache()?;
    chroot.mount_pkgbuilds()?;
    if !extra_packages.is_empty() {
        chroot.try_install_packages(extra_packages, false)?;
    }
    Ok(chroot)
}

/// Run makepkg's source preparation step for the recipe
fn setup_sources(
    recipe: &Recipe,
    chroot: &mut dyn BuildChroot,
    makepkg_conf_path: &str,
) -> Result<()> {
    info!("Setting up sources for {} in {}", recipe.path, chroot.name());
    let cmd = format!(
        "makepkg --config {} --nobuild --holdver --nodeps --skippgpcheck",
        makepkg_conf_path
    );
    let cwd = format!("/pkgbuilds/{}", recipe.path);
    let result = chroot.run_cmd(&cmd, Some(&cwd), &HashMap::new(), false)?;
    if !result.success() {
        return Err(Error::BuildError(format!(
            "Failed to check sources for {}",
            recipe.path
        )));
    }
    Ok(())
}

/// Build one recipe for `arch`. Artifacts land in the recipe's directory
/// under the recipes tree; publication is the caller's job.
pub fn build_recipe(
    config: &Config,
    provider: &dyn ChrootProvider,
    publisher: &Publisher,
    recipe: &Recipe,
    arch: Arch,
    opts: &BuildOptions,
) -> Result<()> {
    let host = config.host_arch()?;
    let foreign = arch != host;

    let names: HashSet<&str> = recipe.names().into_iter().collect();
    let deps: Vec<String> = recipe
        .depends
        .iter()
        .filter(|dep| !names.contains(dep.as_str()))
        .cloned()
        .collect();

    let mut target_chroot = setup_chroot(
        config,
        provider,
        publisher,
        arch,
        &deps,
        opts.clean_chroot,
        true,
    )?;
    let mut native_chroot = if foreign {
        let mut extra: Vec<String> = vec!["base-devel".to_string()];
        extra.extend(CROSSDIRECT_PKGS.iter().map(|s| s.to_string()));
        Some(setup_chroot(
            config,
            provider,
            publisher,
            host,
            &extra,
            opts.clean_chroot,
            true,
        )?)
    } else {
        None
    };

    let cross = foreign && recipe.mode == BuildMode::Cross && opts.crosscompile;

    let mut env = makepkg_env(opts.threads, arch);
    let mut compile_flags: Vec<&str> = vec!["--holdver"];
    let mut makepkg_conf_rel = "etc/makepkg.conf".to_string();

    if cross {
        info!("Cross-compiling {}", recipe.path);
        compile_flags.push("--nodeps");
        if opts.ccache {
            prepend_path(&mut env, "/usr/lib/ccache");
        }
        let native = native_chroot.as_deref_mut().expect("foreign build");

        info!("Setting up dependencies for cross-compilation");
        // crossdirect supplies the ccache symlinks and qemu-user
        let mut packages = recipe.depends.clone();
        packages.extend(CROSSDIRECT_PKGS.iter().map(|s| s.to_string()));
        packages.push(arch.cross_gcc_package(host));
        let results = native.try_install_packages(&packages, true)?;
        let crossdirect_ok = results
            .get("crossdirect")
            .map(|result| result.success())
            .unwrap_or(false);
        if !crossdirect_ok {
            return Err(Error::BuildError("Unable to install crossdirect".to_string()));
        }

        let chroot_relative = format!("chroot/{}", target_chroot.name());
        makepkg_conf_rel = native.write_makepkg_conf(arch, &chroot_relative, true)?;
        native.mount_crosscompile(target_chroot.as_ref())?;
    } else {
        info!("Host-compiling {}", recipe.path);
        compile_flags.push("--syncdeps");
        let crossdirect_eligible = foreign
            && opts.crossdirect
            && !CROSSDIRECT_PKGS.contains(&recipe.name.as_str());
        if crossdirect_eligible {
            prepend_path(&mut env, &format!("/native/usr/lib/crossdirect/{}", arch));
            let native = native_chroot.as_deref().expect("foreign build");
            target_chroot.mount_crossdirect(native)?;
        } else {
            let mut packages = deps.clone();
            if opts.ccache {
                debug!("ccache enabled");
                prepend_path(&mut env, "/usr/lib/ccache");
                packages.push("ccache".to_string());
            }
            debug!(
                "{}Skipping crossdirect",
                if foreign { "" } else { "Building for native arch. " }
            );
            target_chroot.try_install_packages(&packages, false)?;
        }
    }

    let build_root: &mut dyn BuildChroot = if cross {
        native_chroot.as_deref_mut().expect("foreign build")
    } else {
        target_chroot.as_mut()
    };

    let makepkg_conf = format!("/{}", makepkg_conf_rel);
    setup_sources(recipe, build_root, &makepkg_conf)?;

    let build_cmd = format!(
        "makepkg --config {} --skippgpcheck --needed --noconfirm --ignorearch {}",
        makepkg_conf,
        compile_flags.join(" ")
    );
    debug!("Building: running {}", build_cmd);
    let cwd = format!("/pkgbuilds/{}", recipe.path);
    let result = build_root.run_cmd(&build_cmd, Some(&cwd), &env, false)?;
    if !result.success() {
        return Err(Error::BuildError(format!(
            "Failed to compile package {}",
            recipe.path
        )));
    }
    Ok(())
}
