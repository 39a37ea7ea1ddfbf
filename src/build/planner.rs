// src/build/planner.rs

//! Build planning: which solver levels actually need work
//!
//! Combines the dependency solver with the freshness probe. A recipe stays
//! in the plan when it was force-requested, when it is in the dependants
//! closure of a rebuild-dependants run, or when the probe says its
//! artifacts are not all present.

use crate::arch::Arch;
use crate::build::freshness::BuiltProbe;
use crate::error::Result;
use crate::recipe::registry::{RecipeId, Registry};
use crate::recipe::solver::dependency_levels;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Transitive closure of recipes whose dependencies intersect the names of
/// `requested` (the recipes that would need a rebuild if `requested`
/// changed).
pub fn dependants(registry: &Registry, requested: &[RecipeId]) -> HashSet<RecipeId> {
    let mut result: HashSet<RecipeId> = HashSet::new();
    let mut frontier: Vec<RecipeId> = requested.to_vec();
    while !frontier.is_empty() {
        let names: HashSet<&str> = frontier
            .iter()
            .flat_map(|&id| registry.recipe(id).names())
            .collect();
        let mut added = Vec::new();
        for id in registry.unique_ids() {
            if result.contains(&id) || frontier.contains(&id) {
                continue;
            }
            let depends_on = registry
                .recipe(id)
                .depends
                .iter()
                .any(|dep| names.contains(dep.as_str()));
            if depends_on {
                added.push(id);
            }
        }
        result.extend(added.iter().copied());
        frontier = added;
    }
    // the requested recipes themselves are not their own dependants
    for id in requested {
        result.remove(id);
    }
    result
}

/// Solve and filter: the ordered levels of recipes that need (re)building
/// for `arch`.
pub fn unbuilt_levels(
    registry: &Registry,
    requested: &[RecipeId],
    arch: Arch,
    force: bool,
    rebuild_dependants: bool,
    try_download: bool,
    probe: &mut dyn BuiltProbe,
) -> Result<Vec<Vec<RecipeId>>> {
    let dependants = if rebuild_dependants {
        dependants(registry, requested)
    } else {
        HashSet::new()
    };

    let selection: Vec<RecipeId> = {
        let mut ids: BTreeSet<RecipeId> = requested.iter().copied().collect();
        ids.extend(dependants.iter().copied());
        ids.into_iter().collect()
    };
    let levels = dependency_levels(registry, &selection)?;

    let requested_set: HashSet<RecipeId> = requested.iter().copied().collect();
    let mut build_levels = Vec::new();
    for level_ids in levels {
        let mut level = Vec::new();
        for id in level_ids {
            let recipe = registry.recipe(id);
            let keep = (force && requested_set.contains(&id))
                || (rebuild_dependants && dependants.contains(&id))
                || !probe.is_built(recipe, arch, try_download)?;
            if keep {
                level.push(id);
            }
        }
        if !level.is_empty() {
            debug!(
                "Adding to level {}: {}",
                build_levels.len(),
                level
                    .iter()
                    .map(|&id| registry.recipe(id).name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            build_levels.push(level);
        }
    }
    Ok(build_levels)
}
