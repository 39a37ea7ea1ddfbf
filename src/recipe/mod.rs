// src/recipe/mod.rs

//! Package build recipes
//!
//! A `Recipe` is the parsed form of one PKGBUILD entry: what it is called,
//! where it lives in the recipes tree, which logical repository it publishes
//! into, and what it depends on and answers to.

pub mod parser;
pub mod registry;
pub mod solver;
pub mod tree;

pub use parser::{PkgbuildParser, RecipeParser};
pub use registry::{RecipeId, Registry};
pub use solver::dependency_levels;

use std::fmt;

/// Build-mode hint from the recipe (`_mode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Build inside the target-arch environment (native or emulated)
    #[default]
    Host,
    /// Eligible for cross-compilation from the host arch
    Cross,
}

#[derive(Debug, Clone)]
pub struct Recipe {
    /// Canonical package name
    pub name: String,
    /// Location under the recipes tree, `<repo>/<dir>`
    pub path: String,
    /// Logical repository the built artifacts publish into
    pub repo: String,
    /// Full version (`pkgver-pkgrel`); opaque, compared for equality only
    pub version: String,
    pub depends: Vec<String>,
    pub provides: Vec<String>,
    pub replaces: Vec<String>,
    pub mode: BuildMode,
    /// Subset of `depends` satisfiable inside the registry; populated by the
    /// registry after discovery
    pub local_depends: Vec<String>,
}

impl Recipe {
    /// All names this recipe answers to: its own plus provides and replaces
    pub fn names(&self) -> Vec<&str> {
        std::iter::once(self.name.as_str())
            .chain(self.provides.iter().map(String::as_str))
            .chain(self.replaces.iter().map(String::as_str))
            .collect()
    }

    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name
            || self.provides.iter().any(|n| n == name)
            || self.replaces.iter().any(|n| n == name)
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
