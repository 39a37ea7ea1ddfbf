// src/build/mod.rs

//! Build execution: chroot management, freshness, planning, orchestration

pub mod binfmt;
pub mod chroot;
pub mod executor;
pub mod freshness;
pub mod orchestrator;
pub mod planner;

pub use chroot::{BuildChroot, ChrootProvider, CmdResult, HostChroot, HostChrootProvider};
pub use executor::{build_recipe, makepkg_env, setup_chroot};
pub use freshness::{BuiltProbe, FreshnessOracle};
pub use orchestrator::Orchestrator;

use crate::config::Config;

/// Packages required for crossdirect-style foreign builds; these recipes
/// live under the `cross/` repository and must never themselves be built
/// through crossdirect.
pub const CROSSDIRECT_PKGS: [&str; 3] =
    ["crossdirect", "qemu-user-static-bin", "binfmt-qemu-static"];

/// Packages whose installation registers the qemu binfmt handlers
pub const QEMU_BINFMT_PKGS: [&str; 2] = ["qemu-user-static-bin", "binfmt-qemu-static"];

/// Per-invocation build switches, resolved from configuration
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub crosscompile: bool,
    pub crossdirect: bool,
    pub ccache: bool,
    pub clean_chroot: bool,
    pub threads: usize,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            crosscompile: config.build.crosscompile,
            crossdirect: config.build.crossdirect,
            ccache: config.build.ccache,
            clean_chroot: config.build.clean_mode,
            threads: config.threads(),
        }
    }

    /// Options for building the cross helpers themselves: everything that
    /// would depend on those helpers being present is disabled.
    pub fn plain(threads: usize) -> Self {
        Self {
            crosscompile: false,
            crossdirect: false,
            ccache: false,
            clean_chroot: false,
            threads,
        }
    }
}
