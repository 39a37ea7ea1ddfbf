// src/build/freshness.rs

//! Build-freshness decision
//!
//! For one (recipe, arch) pair, work out whether every artifact the recipe
//! would produce is already in the local repo, can be fetched from the
//! mirror, or (for architecture-independent packages) can be borrowed from
//! another arch's repo. Located artifacts are imported into the local repo
//! as a side effect; `any`-arch artifacts fan out to every arch.
//!
//! Network failures are consumed here: they only ever turn "downloadable"
//! into "no".

use crate::arch::Arch;
use crate::build::chroot::{BuildChroot, chroot_name};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::recipe::Recipe;
use crate::repository::distro::{Distro, remote_distro};
use crate::repository::index::HTTP_TIMEOUT;
use crate::repository::publish::{Publisher, strip_compression_suffix};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Answers "is this recipe already built for this arch?"
///
/// The planner only depends on this trait; the oracle below is the real
/// implementation.
pub trait BuiltProbe {
    fn is_built(&mut self, recipe: &Recipe, arch: Arch, try_download: bool) -> Result<bool>;
}

/// Fetch one artifact to `dest`. `file://` URLs are copied, anything else
/// goes through HTTP. Returns false (after logging) on any failure; an HTTP
/// 404 is the expected "not there" answer.
fn download_artifact(url: &str, dest: &Path) -> bool {
    if let Some(parent) = dest.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return false;
        }
    }
    if let Some(path) = url.strip_prefix("file://") {
        return match std::fs::copy(path, dest) {
            Ok(_) => true,
            Err(e) => {
                debug!("Local package {} not available: {}", path, e);
                false
            }
        };
    }

    let client = match reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("HTTP client setup failed: {}", e);
            return false;
        }
    };
    match client.get(url).send() {
        Ok(response) if response.status().is_success() => {
            let bytes = match response.bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read {}: {}", url, e);
                    return false;
                }
            };
            match std::fs::write(dest, &bytes) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to write {}: {}", dest.display(), e);
                    false
                }
            }
        }
        Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
            debug!("Remote package nonexistent on server: {}", url);
            false
        }
        Ok(response) => {
            warn!("Remote package failed to download ({}): {}", response.status(), url);
            false
        }
        Err(e) => {
            warn!("Remote package failed to download: {}: {}", url, e);
            false
        }
    }
}

pub struct FreshnessOracle<'a> {
    config: &'a Config,
    publisher: &'a Publisher<'a>,
    native: &'a mut dyn BuildChroot,
    remotes: HashMap<Arch, Distro>,
}

impl<'a> FreshnessOracle<'a> {
    pub fn new(
        config: &'a Config,
        publisher: &'a Publisher<'a>,
        native: &'a mut dyn BuildChroot,
    ) -> Self {
        Self {
            config,
            publisher,
            native,
            remotes: HashMap::new(),
        }
    }

    /// Artifact basenames this recipe would produce for `arch`, as reported
    /// by the recipe's own build tooling.
    fn package_list(&mut self, recipe: &Recipe, arch: Arch) -> Result<Vec<String>> {
        let conf = self.native.write_makepkg_conf(
            arch,
            &format!("chroot/{}", chroot_name(arch)),
            true,
        )?;
        let cmd = format!(
            "makepkg --config /{} --nobuild --noprepare --skippgpcheck --packagelist",
            conf
        );
        let cwd = format!("/pkgbuilds/{}", recipe.path);
        let result = self
            .native
            .run_cmd(&cmd, Some(&cwd), &HashMap::new(), true)?;
        if !result.success() {
            return Err(Error::BuildError(format!(
                "Failed to get package list for {}:\n{}\n{}",
                recipe.path, result.stdout, result.stderr
            )));
        }
        Ok(result
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                Path::new(line.trim())
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_else(|| line.trim().to_string())
            })
            .collect())
    }

    /// Try to fetch `recipe`'s artifact from the mirror. Only an exact
    /// (name, version, filename) match is taken; anything else means the
    /// package must be built.
    fn try_download(&mut self, dest: &Path, recipe: &Recipe, arch: Arch) -> bool {
        debug!("Checking if we can download {}", recipe.name);
        let filename = match dest.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => return false,
        };

        if !self.remotes.contains_key(&arch) {
            match remote_distro(self.config, arch, false) {
                Ok(distro) => {
                    self.remotes.insert(arch, distro);
                }
                Err(e) => {
                    warn!("Mirror setup failed: {}", e);
                    return false;
                }
            }
        }
        let Some(distro) = self.remotes.get_mut(&arch) else {
            return false;
        };
        let repo = match distro.repo_mut(&recipe.repo) {
            Some(repo) => repo,
            None => {
                warn!("Repository {} is not a known mirror repo", recipe.repo);
                return false;
            }
        };
        let record = match repo.get(&recipe.name) {
            Ok(Some(record)) => record.clone(),
            Ok(None) => {
                warn!(
                    "Package {} not found in remote repos, building instead",
                    recipe.name
                );
                return false;
            }
            Err(e) => {
                warn!("Remote repo scan failed: {}", e);
                return false;
            }
        };
        if record.version != recipe.version {
            debug!(
                "Package {} versions differ: local {}, remote {}. Building instead",
                recipe.name, recipe.version, record.version
            );
            return false;
        }
        if record.filename != filename {
            debug!(
                "Package filenames don't match: local {}, remote {}",
                filename, record.filename
            );
            return false;
        }

        let base = record
            .resolved_url
            .unwrap_or_else(|| repo.resolved_url());
        let url = format!("{}/{}", base, filename);
        info!("Trying to download package {}", url);
        let ok = download_artifact(&url, dest);
        if ok {
            info!("{} downloaded from mirror", filename);
        }
        ok
    }
}

impl BuiltProbe for FreshnessOracle<'_> {
    fn is_built(&mut self, recipe: &Recipe, arch: Arch, try_download: bool) -> Result<bool> {
        let mut missing = false;
        for basename in self.package_list(recipe, arch)? {
            let stripped = strip_compression_suffix(&basename).to_string();
            if !stripped.ends_with(".pkg.tar") {
                debug!("Skipping unknown file extension on {}", basename);
                continue;
            }
            let target = self
                .config
                .package_dir(arch)
                .join(&recipe.repo)
                .join(&basename);
            debug!("Checking if {} is built", target.display());

            let mut found = target.exists();
            if !found && try_download && self.try_download(&target, recipe, arch) {
                found = true;
            }
            if found {
                self.publisher.add_file(&target, &recipe.repo, arch)?;
            }

            if stripped.ends_with("any.pkg.tar") {
                if !target.exists() {
                    // another arch's repo may hold our any-arch artifact
                    for other in Arch::ALL {
                        if other == arch {
                            continue;
                        }
                        let other_copy = self
                            .config
                            .package_dir(other)
                            .join(&recipe.repo)
                            .join(&basename);
                        if other_copy.exists() {
                            info!(
                                "Package {} found in {} repos, copying to {}",
                                basename, other, arch
                            );
                            std::fs::copy(&other_copy, &target)?;
                            self.publisher.add_file(&target, &recipe.repo, arch)?;
                            found = true;
                            break;
                        }
                    }
                }
                if target.exists() {
                    // fan out to arches that still lack it
                    for other in Arch::ALL {
                        if other == arch {
                            continue;
                        }
                        let copy_target = self
                            .config
                            .package_dir(other)
                            .join(&recipe.repo)
                            .join(&basename);
                        if !copy_target.exists() {
                            info!("Copying to {}", copy_target.display());
                            std::fs::create_dir_all(copy_target.parent().unwrap())?;
                            std::fs::copy(&target, &copy_target)?;
                            self.publisher.add_file(&copy_target, &recipe.repo, other)?;
                        }
                    }
                    found = true;
                }
            }

            if !found {
                missing = true;
            }
        }
        Ok(!missing)
    }
}
