// src/build/chroot.rs

//! Build roots
//!
//! `BuildChroot` is the seam between the orchestrator and the isolation
//! machinery: everything above it (executor, freshness, orchestrator) only
//! talks to these traits. `HostChroot` is the shipped implementation,
//! driving `pacstrap`, `arch-chroot` and bind mounts; tests substitute a
//! mock.
//!
//! Inside every build root the conventions are fixed: the local package
//! repos appear at `/packages`, the recipes tree at `/pkgbuilds`, a foreign
//! chroot mounted for cross-compilation at `/chroot/<name>`, and the native
//! chroot for crossdirect at `/native`.

use crate::arch::Arch;
use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Outcome of one command run inside a build root
#[derive(Debug, Clone, Default)]
pub struct CmdResult {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.returncode == 0
    }
}

pub trait BuildChroot {
    fn name(&self) -> &str;
    fn arch(&self) -> Arch;
    /// Absolute path of the chroot on the host
    fn path(&self) -> &Path;

    /// Bootstrap or refresh the base system; `reset` wipes it first
    fn initialize(&mut self, reset: bool) -> Result<()>;
    /// Make the root usable: api filesystems mounted, resolv.conf in place
    fn activate(&mut self) -> Result<()>;
    fn mount_packages(&mut self) -> Result<()>;
    fn mount_pacman_cache(&mut self) -> Result<()>;
    fn mount_pkgbuilds(&mut self) -> Result<()>;
    /// Mount a foreign-arch chroot read/write at `/chroot/<its name>`
    fn mount_crosscompile(&mut self, target: &dyn BuildChroot) -> Result<()>;
    /// Mount the native chroot at `/native` for crossdirect redirection
    fn mount_crossdirect(&mut self, native: &dyn BuildChroot) -> Result<()>;
    fn write_pacman_conf(&mut self) -> Result<()>;
    /// Write a makepkg configuration for `target_arch`; in cross mode the
    /// toolchain sysroot points into `cross_chroot_relative`. Returns the
    /// written file's path relative to the chroot root.
    fn write_makepkg_conf(
        &mut self,
        target_arch: Arch,
        cross_chroot_relative: &str,
        cross: bool,
    ) -> Result<String>;
    /// Install packages one by one, returning each package's result. With
    /// `allow_fail` false any failure is an error (after all attempts).
    fn try_install_packages(
        &mut self,
        packages: &[String],
        allow_fail: bool,
    ) -> Result<HashMap<String, CmdResult>>;
    /// Run a shell command inside the chroot
    fn run_cmd(
        &mut self,
        script: &str,
        cwd: Option<&str>,
        env: &HashMap<String, String>,
        capture_output: bool,
    ) -> Result<CmdResult>;
}

/// Hands out build roots; one chroot per (provider, arch) at a time.
pub trait ChrootProvider {
    fn get(&self, arch: Arch, add_local_repos: bool) -> Result<Box<dyn BuildChroot>>;
}

/// Conventional chroot name for an arch's build root
pub fn chroot_name(arch: Arch) -> String {
    format!("build_{}", arch)
}

/// Shell-out implementation of `BuildChroot`
pub struct HostChroot {
    name: String,
    arch: Arch,
    path: PathBuf,
    config: Config,
    add_local_repos: bool,
    active: bool,
}

impl HostChroot {
    pub fn new(config: &Config, arch: Arch, add_local_repos: bool) -> Self {
        let name = chroot_name(arch);
        let path = config.chroot_dir(&name);
        Self {
            name,
            arch,
            path,
            config: config.clone(),
            add_local_repos,
            active: false,
        }
    }

    fn host_cmd(&self, program: &str, args: &[&str]) -> Result<CmdResult> {
        debug!("{}: running {} {}", self.name, program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::BuildError(format!("Failed to run {}: {}", program, e)))?;
        Ok(CmdResult {
            returncode: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn bind_mount(&self, source: &Path, inner: &str) -> Result<()> {
        let mountpoint = self.path.join(inner.trim_start_matches('/'));
        std::fs::create_dir_all(&mountpoint)?;
        let check = self.host_cmd("mountpoint", &["-q", &mountpoint.to_string_lossy()])?;
        if check.success() {
            return Ok(());
        }
        let result = self.host_cmd(
            "mount",
            &[
                "-o",
                "bind",
                &source.to_string_lossy(),
                &mountpoint.to_string_lossy(),
            ],
        )?;
        if !result.success() {
            return Err(Error::BuildError(format!(
                "Failed to mount {} into {}: {}",
                source.display(),
                self.name,
                result.stderr.trim()
            )));
        }
        Ok(())
    }

    fn pacman_conf_body(&self) -> String {
        let mut conf = format!(
            "[options]\nArchitecture = {}\nParallelDownloads = 4\nSigLevel = Never\n",
            self.arch
        );
        if self.add_local_repos {
            for repo in self.config.repositories() {
                conf.push_str(&format!(
                    "\n[{repo}]\nServer = file:///packages/{arch}/{repo}\n",
                    repo = repo,
                    arch = self.arch
                ));
            }
        }
        conf
    }
}

impl BuildChroot for HostChroot {
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
        if reset && self.path.exists() {
            info!("Resetting chroot {}", self.name);
            std::fs::remove_dir_all(&self.path)?;
        }
        std::fs::create_dir_all(self.path.join("etc"))?;
        self.write_pacman_conf()?;
        if self.path.join("usr/bin").exists() {
            return Ok(());
        }
        info!("Bootstrapping chroot {} ({})", self.name, self.arch);
        let conf = self.path.join("etc/pacman.conf");
        let result = self.host_cmd(
            "pacstrap",
            &[
                "-C",
                &conf.to_string_lossy(),
                "-G",
                "-M",
                &self.path.to_string_lossy(),
                "base-devel",
            ],
        )?;
        if !result.success() {
            return Err(Error::BuildError(format!(
                "Failed to bootstrap chroot {}: {}",
                self.name,
                result.stderr.trim()
            )));
        }
        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }
        for (source, inner) in [("/proc", "proc"), ("/sys", "sys"), ("/dev", "dev")] {
            self.bind_mount(Path::new(source), inner)?;
        }
        let resolv = self.path.join("etc/resolv.conf");
        if Path::new("/etc/resolv.conf").exists() {
            std::fs::copy("/etc/resolv.conf", &resolv)?;
        }
        self.active = true;
        Ok(())
    }

    fn mount_packages(&mut self) -> Result<()> {
        self.bind_mount(&self.config.paths.packages, "packages")
    }

    fn mount_pacman_cache(&mut self) -> Result<()> {
        let cache = self.config.pacman_cache_dir(self.arch);
        std::fs::create_dir_all(&cache)?;
        self.bind_mount(&cache, "var/cache/pacman/pkg")
    }

    fn mount_pkgbuilds(&mut self) -> Result<()> {
        self.bind_mount(self.config.pkgbuilds_dir(), "pkgbuilds")
    }

    fn mount_crosscompile(&mut self, target: &dyn BuildChroot) -> Result<()> {
        self.bind_mount(target.path(), &format!("chroot/{}", target.name()))
    }

    fn mount_crossdirect(&mut self, native: &dyn BuildChroot) -> Result<()> {
        self.bind_mount(native.path(), "native")
    }

    fn write_pacman_conf(&mut self) -> Result<()> {
        let conf = self.path.join("etc/pacman.conf");
        std::fs::create_dir_all(conf.parent().unwrap())?;
        std::fs::write(&conf, self.pacman_conf_body())?;
        Ok(())
    }

    fn write_makepkg_conf(
        &mut self,
        target_arch: Arch,
        cross_chroot_relative: &str,
        cross: bool,
    ) -> Result<String> {
        let relative = if cross {
            format!("etc/makepkg-cross-{}.conf", target_arch)
        } else {
            "etc/makepkg.conf".to_string()
        };
        let absolute = self.path.join(&relative);
        std::fs::create_dir_all(absolute.parent().unwrap())?;

        let mut conf = format!(
            "CARCH=\"{carch}\"\nCHOST=\"{chost}\"\nPKGEXT=\".pkg.tar.zst\"\nSRCEXT=\".src.tar.gz\"\n",
            carch = target_arch,
            chost = target_arch.triple(),
        );
        if cross {
            let hostspec = target_arch.gcc_hostspec(self.arch);
            let sysroot = format!("/{}", cross_chroot_relative.trim_start_matches('/'));
            conf.push_str(&format!(
                "CC=\"{hostspec}-gcc --sysroot={sysroot}\"\n\
                 CXX=\"{hostspec}-g++ --sysroot={sysroot}\"\n\
                 PKG_CONFIG_SYSROOT_DIR=\"{sysroot}\"\n\
                 PKG_CONFIG_LIBDIR=\"{sysroot}/usr/lib/pkgconfig\"\n",
            ));
        }
        std::fs::write(&absolute, conf)?;
        Ok(relative)
    }

    fn try_install_packages(
        &mut self,
        packages: &[String],
        allow_fail: bool,
    ) -> Result<HashMap<String, CmdResult>> {
        let mut results = HashMap::new();
        for package in packages {
            let script = format!(
                "pacman -S --noconfirm --needed --overwrite='*' {}",
                package
            );
            let result = self.run_cmd(&script, None, &HashMap::new(), true)?;
            if !result.success() {
                debug!(
                    "{}: failed to install {}: {}",
                    self.name,
                    package,
                    result.stderr.trim()
                );
            }
            results.insert(package.clone(), result);
        }
        if !allow_fail {
            let failed: Vec<&str> = results
                .iter()
                .filter(|(_, result)| !result.success())
                .map(|(name, _)| name.as_str())
                .collect();
            if !failed.is_empty() {
                return Err(Error::BuildError(format!(
                    "Dependencies failed to install in {}: {}",
                    self.name,
                    failed.join(", ")
                )));
            }
        }
        Ok(results)
    }

    fn run_cmd(
        &mut self,
        script: &str,
        cwd: Option<&str>,
        env: &HashMap<String, String>,
        capture_output: bool,
    ) -> Result<CmdResult> {
        let script = match cwd {
            Some(dir) => format!("cd {} && {}", dir, script),
            None => script.to_string(),
        };
        debug!("{}: sh -c {:?}", self.name, script);
        let mut cmd = Command::new("arch-chroot");
        cmd.arg(&self.path).arg("sh").arg("-c").arg(&script);
        for (key, value) in env {
            cmd.env(key, value);
        }
        if capture_output {
            let output = cmd
                .output()
                .map_err(|e| Error::BuildError(format!("Failed to enter {}: {}", self.name, e)))?;
            Ok(CmdResult {
                returncode: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        } else {
            let status = cmd
                .status()
                .map_err(|e| Error::BuildError(format!("Failed to enter {}: {}", self.name, e)))?;
            Ok(CmdResult {
                returncode: status.code().unwrap_or(-1),
                ..Default::default()
            })
        }
    }
}

/// Provider handing out `HostChroot`s under the configured chroot directory
pub struct HostChrootProvider {
    config: Config,
}

impl HostChrootProvider {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl ChrootProvider for HostChrootProvider {
    fn get(&self, arch: Arch, add_local_repos: bool) -> Result<Box<dyn BuildChroot>> {
        Ok(Box::new(HostChroot::new(&self.config, arch, add_local_repos)))
    }
}
