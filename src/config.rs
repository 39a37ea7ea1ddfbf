// src/config.rs

//! Configuration surface
//!
//! One `Config` value is built at program start from a TOML file (or pure
//! defaults when the file is absent) and passed by reference into every
//! component. There is no ambient mutable state.

use crate::arch::Arch;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the configuration file, relative to the state dir
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Build job count; 0 means one job per CPU
    pub threads: usize,
    pub crosscompile: bool,
    pub crossdirect: bool,
    pub ccache: bool,
    /// Reset build chroots before every build
    pub clean_mode: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            crosscompile: true,
            crossdirect: true,
            ccache: true,
            clean_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PkgbuildsConfig {
    pub git_repo: String,
    pub git_branch: String,
    /// Logical repositories, in overlay order (later wins on conflicts)
    pub repositories: Vec<String>,
}

impl Default for PkgbuildsConfig {
    fn default() -> Self {
        Self {
            git_repo: "https://github.com/kiln-dist/pkgbuilds.git".to_string(),
            git_branch: "main".to_string(),
            repositories: ["boot", "cross", "device", "firmware", "linux", "main"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub pkgbuilds: PathBuf,
    pub packages: PathBuf,
    pub pacman: PathBuf,
    pub chroots: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let state = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/var/cache"))
            .join("kiln");
        Self {
            pkgbuilds: state.join("pkgbuilds"),
            packages: state.join("packages"),
            pacman: state.join("pacman"),
            chroots: state.join("chroot"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Host arch override; detected from the running machine when unset
    pub arch: Option<Arch>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// URL template for the HTTPS package mirror; `$arch` and `$repo` are
    /// substituted at scan time
    pub url_template: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            url_template: "https://packages.kiln-dist.org/$arch/$repo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SideloadConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
}

impl Default for SideloadConfig {
    fn default() -> Self {
        Self {
            host: "172.16.42.1".to_string(),
            user: "kiln".to_string(),
            port: 22,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub build: BuildConfig,
    pub pkgbuilds: PkgbuildsConfig,
    pub paths: PathsConfig,
    pub runtime: RuntimeConfig,
    pub mirror: MirrorConfig,
    pub sideload: SideloadConfig,
}

impl Config {
    /// Load configuration from `path`, or fall back to defaults when no file
    /// exists. A present-but-malformed file is a hard error.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("/etc"))
                .join("kiln")
                .join(CONFIG_FILE_NAME),
        };
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
            .map_err(|e| Error::ConfigError(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> std::result::Result<Config, toml::de::Error> {
        toml::from_str(text)
    }

    /// The architecture builds run on
    pub fn host_arch(&self) -> Result<Arch> {
        match self.runtime.arch {
            Some(arch) => Ok(arch),
            None => Arch::this_machine(),
        }
    }

    /// Effective build job count (`build.threads`, or the CPU count when 0)
    pub fn threads(&self) -> usize {
        if self.build.threads > 0 {
            self.build.threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn repositories(&self) -> &[String] {
        &self.pkgbuilds.repositories
    }

    pub fn pkgbuilds_dir(&self) -> &Path {
        &self.paths.pkgbuilds
    }

    /// Per-arch root of the local package repositories
    pub fn package_dir(&self, arch: Arch) -> PathBuf {
        self.paths.packages.join(arch.name())
    }

    /// Per-arch pacman download cache
    pub fn pacman_cache_dir(&self, arch: Arch) -> PathBuf {
        self.paths.pacman.join(arch.name())
    }

    pub fn chroot_dir(&self, name: &str) -> PathBuf {
        self.paths.chroots.join(name)
    }
}
