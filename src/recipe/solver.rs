// src/recipe/solver.rs

//! Stratified dependency solver
//!
//! Turns a set of requested recipes into build levels: an ordered list of
//! disjoint recipe sets where every registry-resolvable dependency of a
//! recipe sits in a strictly earlier level. Unknown dependency names are
//! treated as satisfied externally.
//!
//! The algorithm seeds level 0 with the requested recipes and their
//! recursive local dependencies, then repeatedly bubbles recipes upwards:
//! anything another recipe in the same level depends on moves one level up.
//! The final list is reversed so the deepest dependencies come first.

use crate::error::{Error, Result};
use crate::recipe::registry::{RecipeId, Registry};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Hard ceiling on level depth; deeper chains indicate a bug or a cycle
const MAX_LEVELS: usize = 100;
/// A level passed this many times without change indicates a cycle
const MAX_REPEATS: usize = 10;

/// Compute build levels for `requested`, deepest dependencies first.
pub fn dependency_levels(
    registry: &Registry,
    requested: &[RecipeId],
) -> Result<Vec<Vec<RecipeId>>> {
    let mut visited: HashSet<RecipeId> = HashSet::new();
    let mut visited_names: HashSet<String> = HashSet::new();
    let mut levels: Vec<BTreeSet<RecipeId>> = vec![BTreeSet::new(), BTreeSet::new()];

    let mut visit = |id: RecipeId, names: &mut HashSet<String>, seen: &mut HashSet<RecipeId>| {
        seen.insert(id);
        for name in registry.recipe(id).names() {
            names.insert(name.to_string());
        }
    };

    // Level 0: the requested recipes plus their recursive local dependencies
    let mut stack: Vec<RecipeId> = Vec::new();
    for &id in requested {
        visit(id, &mut visited_names, &mut visited);
        levels[0].insert(id);
        stack.push(id);
    }
    while let Some(id) = stack.pop() {
        for dep in &registry.recipe(id).depends {
            if visited_names.contains(dep) {
                continue;
            }
            if let Some(dep_id) = registry.resolve(dep) {
                debug!(
                    "Adding {}'s dependency {} to level 0",
                    registry.recipe(id).name,
                    dep
                );
                visit(dep_id, &mut visited_names, &mut visited);
                levels[0].insert(dep_id);
                stack.push(dep_id);
            }
        }
    }

    let mut level = 0;
    let mut repeat_count = 0;
    let mut last_level: Option<BTreeSet<RecipeId>> = None;
    while !levels[level].is_empty() {
        if level > MAX_LEVELS {
            return Err(Error::SolverError(format!(
                "Dependency chain exceeded {} levels, giving up",
                MAX_LEVELS
            )));
        }
        debug!("Scanning dependency level {}", level);
        let snapshot: Vec<RecipeId> = levels[level].iter().copied().collect();
        let mut modified = false;

        for &id in &snapshot {
            if !levels[level].contains(&id) {
                // already moved this pass
                continue;
            }
            let names: HashSet<&str> = registry.recipe(id).names().into_iter().collect();
            for &other in &snapshot {
                if other == id {
                    continue;
                }
                let depends_on_id = registry
                    .recipe(other)
                    .depends
                    .iter()
                    .any(|dep| names.contains(dep.as_str()));
                if depends_on_id {
                    levels[level].remove(&id);
                    levels[level + 1].insert(id);
                    debug!(
                        "Moving {} to level {} because {} depends on it",
                        registry.recipe(id).name,
                        level + 1,
                        registry.recipe(other).name
                    );
                    modified = true;
                    break;
                }
            }
            for dep in &registry.recipe(id).depends {
                if visited_names.contains(dep) {
                    continue;
                }
                if let Some(dep_id) = registry.resolve(dep) {
                    debug!(
                        "Adding {}'s dependency {} to level {}",
                        registry.recipe(id).name,
                        dep,
                        level
                    );
                    visit(dep_id, &mut visited_names, &mut visited);
                    levels[level].insert(dep_id);
                    modified = true;
                }
            }
        }

        if last_level.as_ref() == Some(&levels[level]) {
            repeat_count += 1;
        } else {
            repeat_count = 0;
        }
        if repeat_count > MAX_REPEATS {
            return Err(Error::SolverError(format!(
                "Probable dependency cycle: level {} passed unmodified {} times",
                level, repeat_count
            )));
        }
        last_level = Some(levels[level].clone());

        if !modified {
            level += 1;
            levels.push(BTreeSet::new());
        }
    }

    // Deepest dependencies first, empty levels dropped
    let result: Vec<Vec<RecipeId>> = levels
        .into_iter()
        .rev()
        .filter(|lvl| !lvl.is_empty())
        .map(|lvl| lvl.into_iter().collect())
        .collect();
    validate_stratification(registry, &result)?;
    Ok(result)
}

/// Reject plans where a recipe's resolvable in-plan dependency did not land
/// in a strictly earlier level. Mutual dependencies collapse into one level
/// during bubbling, so this is where tight cycles surface.
fn validate_stratification(registry: &Registry, levels: &[Vec<RecipeId>]) -> Result<()> {
    let mut seen: HashSet<RecipeId> = HashSet::new();
    let planned: HashSet<RecipeId> = levels.iter().flatten().copied().collect();
    for level in levels {
        let current: HashSet<RecipeId> = level.iter().copied().collect();
        for &id in level {
            for dep in &registry.recipe(id).depends {
                if let Some(dep_id) = registry.resolve(dep) {
                    if dep_id == id || !planned.contains(&dep_id) {
                        continue;
                    }
                    if current.contains(&dep_id) || !seen.contains(&dep_id) {
                        return Err(Error::SolverError(format!(
                            "Dependency cycle involving {} and {}",
                            registry.recipe(id).name,
                            registry.recipe(dep_id).name
                        )));
                    }
                }
            }
        }
        seen.extend(level.iter().copied());
    }
    Ok(())
}
