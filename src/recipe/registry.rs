// src/recipe/registry.rs

//! Recipe registry: discovery, alias resolution, local dependency linking
//!
//! Recipes live in an arena indexed by `RecipeId`; the name index maps every
//! alias (name, provides, replaces) to an id. Multiple keys may point at the
//! same recipe. Parsing runs across a worker pool; merging into the registry
//! happens in a single-threaded reducer.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::recipe::{Recipe, RecipeParser};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Stable handle into the registry's recipe arena
pub type RecipeId = usize;

#[derive(Debug, Default)]
pub struct Registry {
    recipes: Vec<Recipe>,
    by_name: HashMap<String, RecipeId>,
}

impl Registry {
    /// Discover all recipes under the configured tree.
    ///
    /// Parsing is parallel (roughly four workers per CPU; each parse only
    /// reads its own directory); insertion and alias linking are sequential.
    pub fn discover(config: &Config, parser: &dyn RecipeParser) -> Result<Registry> {
        let root = config.pkgbuilds_dir();
        let mut paths = Vec::new();
        for repo in config.repositories() {
            let repo_dir = root.join(repo);
            if !repo_dir.is_dir() {
                debug!("No {} directory under {}", repo, root.display());
                continue;
            }
            for entry in walkdir::WalkDir::new(&repo_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.path().join("PKGBUILD").is_file() {
                    paths.push(format!("{}/{}", repo, entry.file_name().to_string_lossy()));
                }
            }
        }
        debug!("Parsing {} recipe directories", paths.len());

        let workers = config.threads().saturating_mul(4).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::DiscoveryError(format!("Failed to start parser pool: {}", e)))?;
        let parsed: Vec<Result<Vec<Recipe>>> =
            pool.install(|| paths.par_iter().map(|p| parser.parse(p)).collect());

        let mut registry = Registry::default();
        for chunk in parsed {
            for recipe in chunk? {
                registry.insert(recipe);
            }
        }
        registry.link_local_depends();
        debug!("Discovered {} recipes", registry.unique_ids().len());
        Ok(registry)
    }

    /// Insert a recipe under every name it answers to. On collision the
    /// later insertion wins and a warning names the displaced recipe.
    pub fn insert(&mut self, recipe: Recipe) -> RecipeId {
        let id = self.recipes.len();
        let keys: Vec<String> = recipe.names().iter().map(|n| n.to_string()).collect();
        self.recipes.push(recipe);
        for key in keys {
            if let Some(previous) = self.by_name.insert(key.clone(), id) {
                warn!(
                    "Overriding {} with {} for name {}",
                    self.recipes[previous], self.recipes[id], key
                );
            }
        }
        id
    }

    /// Populate every recipe's `local_depends` with the dependencies that
    /// some registry entry answers to.
    fn link_local_depends(&mut self) {
        let resolvable: HashSet<String> = self.by_name.keys().cloned().collect();
        for recipe in &mut self.recipes {
            recipe.local_depends = recipe
                .depends
                .iter()
                .filter(|dep| resolvable.contains(*dep))
                .cloned()
                .collect();
            for dep in &recipe.depends {
                if !resolvable.contains(dep) {
                    debug!("{}: dependency {} is external", recipe.name, dep);
                }
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Option<RecipeId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.resolve(name).map(|id| &self.recipes[id])
    }

    pub fn recipe(&self, id: RecipeId) -> &Recipe {
        &self.recipes[id]
    }

    /// Ids of all distinct recipes (aliases collapse)
    pub fn unique_ids(&self) -> Vec<RecipeId> {
        let ids: BTreeSet<RecipeId> = self.by_name.values().copied().collect();
        ids.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Select recipes by path or name. The token `"all"` selects everything.
    pub fn filter_by_paths(&self, paths: &[String], allow_empty: bool) -> Result<Vec<RecipeId>> {
        let selection: Vec<RecipeId> = if paths.iter().any(|p| p == "all") {
            self.unique_ids()
        } else {
            self.unique_ids()
                .into_iter()
                .filter(|&id| {
                    let recipe = &self.recipes[id];
                    paths.iter().any(|p| *p == recipe.path || *p == recipe.name)
                })
                .collect()
        };
        if selection.is_empty() && !allow_empty {
            return Err(Error::DiscoveryError(format!(
                "No packages matched by paths: {}",
                paths
                    .iter()
                    .map(|p| format!("\"{}\"", p))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(selection)
    }
}
