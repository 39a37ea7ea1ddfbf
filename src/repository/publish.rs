// src/repository/publish.rs

//! Local repository publication
//!
//! Artifacts move into `<packages>/<arch>/<repo>/` and get registered in the
//! repo database via `repo-add`. After every mutation the unsuffixed
//! `<repo>.db`/`<repo>.files` are byte copies of their `.tar.xz` siblings.
//! Architecture-independent (`any`) artifacts fan out to every other arch's
//! repo.

use crate::arch::Arch;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::recipe::Recipe;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

const PKG_COMPRESSION_SUFFIXES: [&str; 4] = ["zst", "xz", "gz", "bz2"];

/// Strip a known compression suffix from a package filename, yielding the
/// canonical `.pkg.tar` basename. Unknown extensions pass through with a
/// warning.
pub fn strip_compression_suffix(filename: &str) -> &str {
    for ext in PKG_COMPRESSION_SUFFIXES {
        if let Some(stripped) = filename.strip_suffix(&format!(".{}", ext)) {
            if stripped.ends_with(".pkg.tar") {
                return stripped;
            }
        }
    }
    if !filename.ends_with(".pkg.tar") {
        warn!("File {} matches no known package extension", filename);
    }
    filename
}

/// Write an empty tar archive, xz-compressed, at `path`
fn write_empty_index(path: &Path) -> Result<()> {
    let write = || -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        let encoder = xz2::write::XzEncoder::new(file, 6);
        let mut builder = tar::Builder::new(encoder);
        builder.finish()?;
        builder.into_inner()?.finish()?;
        Ok(())
    };
    write()
        .map_err(|e| Error::PublishError(format!("Failed to write {}: {}", path.display(), e)))
}

pub struct Publisher<'a> {
    config: &'a Config,
    repo_add: PathBuf,
}

impl<'a> Publisher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            repo_add: PathBuf::from("repo-add"),
        }
    }

    /// Use a specific `repo-add` executable (tests point this at a stub)
    pub fn with_repo_add(config: &'a Config, repo_add: impl Into<PathBuf>) -> Self {
        Self {
            config,
            repo_add: repo_add.into(),
        }
    }

    fn repo_dir(&self, repo_name: &str, arch: Arch) -> PathBuf {
        self.config.package_dir(arch).join(repo_name)
    }

    /// Ensure every configured repo exists for `arch` with db/files indices
    /// present (empty archives when the repo is brand new).
    pub fn init_repos(&self, arch: Arch) -> Result<()> {
        for repo in self.config.repositories() {
            let repo_dir = self.repo_dir(repo, arch);
            if !repo_dir.exists() {
                info!("Creating local repo {} ({})", repo, arch);
                std::fs::create_dir_all(&repo_dir)?;
            }
            for ext in ["db", "files"] {
                let suffixed = repo_dir.join(format!("{}.{}.tar.xz", repo, ext));
                if !suffixed.exists() {
                    write_empty_index(&suffixed)?;
                }
                let plain = repo_dir.join(format!("{}.{}", repo, ext));
                if !plain.exists() {
                    std::fs::copy(&suffixed, &plain)?;
                }
            }
        }
        Ok(())
    }

    /// Insert one artifact file into the repo database for `arch`.
    ///
    /// The file is moved into the repo directory if it is not already there,
    /// any same-named artifact is dropped from the pacman download cache,
    /// and the index files are normalised afterwards. Returns the artifact's
    /// final path.
    pub fn add_file(&self, file_path: &Path, repo_name: &str, arch: Arch) -> Result<PathBuf> {
        let repo_dir = self.repo_dir(repo_name, arch);
        std::fs::create_dir_all(&repo_dir)?;

        let file_name = file_path
            .file_name()
            .ok_or_else(|| {
                Error::PublishError(format!("Not a file path: {}", file_path.display()))
            })?
            .to_string_lossy()
            .to_string();
        let target_file = repo_dir.join(&file_name);

        if file_path != target_file {
            debug!("Moving {} to {}", file_path.display(), target_file.display());
            std::fs::copy(file_path, &target_file)?;
            std::fs::remove_file(file_path)?;
        }

        // drop a stale copy from the pacman download cache
        let cache_file = self.config.pacman_cache_dir(arch).join(&file_name);
        if cache_file.exists() {
            debug!("Removing cached {}", cache_file.display());
            std::fs::remove_file(&cache_file)?;
        }

        let db_file = repo_dir.join(format!("{}.db.tar.xz", repo_name));
        debug!(
            "repo-add --remove {} {}",
            db_file.display(),
            target_file.display()
        );
        let status = Command::new(&self.repo_add)
            .arg("--remove")
            .arg(&db_file)
            .arg(&target_file)
            .status()
            .map_err(|e| Error::PublishError(format!("Failed to run repo-add: {}", e)))?;
        if !status.success() {
            return Err(Error::PublishError(format!(
                "Failed to add package {} to repo {}",
                target_file.display(),
                repo_name
            )));
        }

        self.normalize_index(&repo_dir, repo_name)?;
        Ok(target_file)
    }

    /// Make the unsuffixed index files byte copies of their `.tar.xz`
    /// siblings and drop `repo-add`'s `.old` backups.
    fn normalize_index(&self, repo_dir: &Path, repo_name: &str) -> Result<()> {
        for ext in ["db", "files"] {
            let plain = repo_dir.join(format!("{}.{}", repo_name, ext));
            let suffixed = repo_dir.join(format!("{}.{}.tar.xz", repo_name, ext));
            if suffixed.exists() {
                if plain.exists() {
                    std::fs::remove_file(&plain)?;
                }
                std::fs::copy(&suffixed, &plain)?;
            }
            let old = repo_dir.join(format!("{}.{}.tar.xz.old", repo_name, ext));
            if old.exists() {
                std::fs::remove_file(&old)?;
            }
        }
        Ok(())
    }

    /// Publish everything a finished build left in the recipe's directory.
    ///
    /// `any`-arch artifacts are additionally copied into every other arch's
    /// repo and registered there. Returns the published file paths under
    /// `arch`'s repo.
    pub fn add_recipe_artifacts(&self, recipe: &Recipe, arch: Arch) -> Result<Vec<PathBuf>> {
        info!("Adding {} to repo {}", recipe.path, recipe.repo);
        let pkgbuild_dir = self.config.pkgbuilds_dir().join(&recipe.path);

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&pkgbuild_dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            let stripped = strip_compression_suffix(&file_name).to_string();
            if !stripped.ends_with(".pkg.tar") {
                continue;
            }

            let repo_file = self.add_file(&entry.path(), &recipe.repo, arch)?;
            files.push(repo_file.clone());

            if stripped.ends_with("any.pkg.tar") {
                for other in Arch::ALL {
                    if other == arch {
                        continue;
                    }
                    let copy_target = self.repo_dir(&recipe.repo, other).join(&file_name);
                    std::fs::create_dir_all(copy_target.parent().unwrap())?;
                    std::fs::copy(&repo_file, &copy_target)?;
                    self.add_file(&copy_target, &recipe.repo, other)?;
                }
            }
        }

        if files.is_empty() {
            return Err(Error::PublishError(format!(
                "Build of {} produced no artifacts in {}",
                recipe.name,
                pkgbuild_dir.display()
            )));
        }
        Ok(files)
    }
}
