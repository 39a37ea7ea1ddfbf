// src/recipe/parser.rs

//! PKGBUILD to Recipe extraction
//!
//! Recipes are plain PKGBUILD files. Only variable assignments are read;
//! functions are never executed. Scalar `key=value` assignments and
//! `key=(...)` arrays are extracted textually, with `$pkgname`/`$pkgver`/
//! `$pkgrel` references substituted afterwards.
//!
//! Split packages (`pkgname=(a b)`) yield one record per member sharing the
//! base version and dependency lists.

use crate::error::{Error, Result};
use crate::recipe::{BuildMode, Recipe};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

/// Parses one recipe directory into its package records.
///
/// Implementations must be shareable across the discovery worker pool.
pub trait RecipeParser: Sync {
    /// `rel_path` is `<repo>/<dir>` under the recipes tree
    fn parse(&self, rel_path: &str) -> Result<Vec<Recipe>>;
}

/// Textual PKGBUILD parser
pub struct PkgbuildParser {
    root: PathBuf,
}

fn scalar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^([A-Za-z_][A-Za-z0-9_]*)=([^(\s][^\n]*)$").unwrap())
}

/// Extract scalar `key=value` assignments, stripping surrounding quotes
fn extract_variables(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for cap in scalar_re().captures_iter(content) {
        let key = cap[1].to_string();
        let value = cap[2].trim().trim_matches('"').trim_matches('\'').to_string();
        vars.insert(key, value);
    }
    vars
}

/// Extract a `name=( ... )` array, possibly spanning multiple lines
fn extract_array(content: &str, name: &str) -> Option<Vec<String>> {
    let marker = format!("{}=(", name);
    let start = content
        .lines()
        .scan(0usize, |offset, line| {
            let this = *offset;
            *offset += line.len() + 1;
            Some((this, line))
        })
        .find(|(_, line)| line.starts_with(&marker))
        .map(|(offset, _)| offset + marker.len())?;
    let end = content[start..].find(')')? + start;
    let items = content[start..end]
        .split_whitespace()
        .map(|item| item.trim_matches('"').trim_matches('\'').to_string())
        .filter(|item| !item.is_empty() && !item.starts_with('#'))
        .collect();
    Some(items)
}

/// Substitute `$pkgname`/`$pkgver`/`$pkgrel` references in an extracted value
fn substitute(value: &str, vars: &HashMap<String, String>) -> String {
    let mut result = value.to_string();
    for key in ["pkgname", "pkgver", "pkgrel"] {
        if let Some(v) = vars.get(key) {
            result = result
                .replace(&format!("${{{}}}", key), v)
                .replace(&format!("${}", key), v);
        }
    }
    result
}

/// Strip a version constraint (`foo>=1.2` -> `foo`)
fn dep_name(dep: &str) -> &str {
    dep.split(['>', '<', '=']).next().unwrap_or(dep)
}

impl PkgbuildParser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pkgbuild_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path).join("PKGBUILD")
    }

    fn required(vars: &HashMap<String, String>, key: &str, rel_path: &str) -> Result<String> {
        vars.get(key).cloned().ok_or_else(|| {
            Error::DiscoveryError(format!("{}: missing required variable {}", rel_path, key))
        })
    }
}

impl RecipeParser for PkgbuildParser {
    fn parse(&self, rel_path: &str) -> Result<Vec<Recipe>> {
        let path = self.pkgbuild_path(rel_path);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::DiscoveryError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let vars = extract_variables(&content);
        let pkgver = Self::required(&vars, "pkgver", rel_path)?;
        let pkgrel = Self::required(&vars, "pkgrel", rel_path)?;
        let version = format!("{}-{}", pkgver, pkgrel);

        let mode = match vars.get("_mode").map(String::as_str) {
            Some("cross") => BuildMode::Cross,
            Some("host") => BuildMode::Host,
            Some(other) => {
                warn!("{}: unknown _mode \"{}\", assuming host", rel_path, other);
                BuildMode::Host
            }
            None => {
                warn!("{}: no _mode hint, assuming host", rel_path);
                BuildMode::Host
            }
        };

        let names = match extract_array(&content, "pkgname") {
            Some(list) if !list.is_empty() => list,
            _ => vec![Self::required(&vars, "pkgname", rel_path)?],
        };

        let extract_deps = |key: &str| -> Vec<String> {
            extract_array(&content, key)
                .unwrap_or_default()
                .iter()
                .map(|d| dep_name(&substitute(d, &vars)).to_string())
                .collect()
        };

        let mut depends = extract_deps("depends");
        for make_dep in extract_deps("makedepends") {
            if !depends.contains(&make_dep) {
                depends.push(make_dep);
            }
        }
        let provides = extract_deps("provides");
        let replaces = extract_deps("replaces");

        let repo = rel_path.split('/').next().unwrap_or(rel_path).to_string();

        Ok(names
            .into_iter()
            .map(|name| Recipe {
                name,
                path: rel_path.to_string(),
                repo: repo.clone(),
                version: version.clone(),
                depends: depends.clone(),
                provides: provides.clone(),
                replaces: replaces.clone(),
                mode,
                local_depends: Vec::new(),
            })
            .collect())
    }
}

/// Lint a PKGBUILD for the problems the `check` command reports.
///
/// Returns a list of human-readable findings; empty means clean.
pub fn lint(path: &Path, arches: &[&str]) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::DiscoveryError(format!("Failed to read {}: {}", path.display(), e)))?;
    let mut problems = Vec::new();

    if content.contains('\t') {
        problems.push("tab characters are not allowed".to_string());
    }
    if content.trim().is_empty() {
        problems.push("file is empty".to_string());
        return Ok(problems);
    }

    let vars = extract_variables(&content);
    for key in ["_mode", "pkgver", "pkgrel"] {
        if !vars.contains_key(key) {
            problems.push(format!("missing required variable {}", key));
        }
    }
    if !vars.contains_key("pkgname") && extract_array(&content, "pkgname").is_none() {
        problems.push("missing required variable pkgname".to_string());
    }
    for key in ["arch", "license"] {
        if extract_array(&content, key).is_none() && !vars.contains_key(key) {
            problems.push(format!("missing required variable {}", key));
        }
    }

    // `_arches=all` promises the recipe builds everywhere; the arch array
    // must then list every supported architecture (or `any`)
    if vars.get("_arches").map(String::as_str) == Some("all") {
        let provided = extract_array(&content, "arch")
            .or_else(|| vars.get("arch").map(|a| vec![a.clone()]))
            .unwrap_or_default();
        if !provided.iter().any(|a| a == "any") {
            for arch in arches {
                if !provided.iter().any(|a| a == arch) {
                    problems.push(format!("arches hint is `all` but {} is missing from arch=()", arch));
                }
            }
        }
    }

    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"# Maintainer: somebody
_mode=cross
pkgname=linux-test
pkgver=6.6.1
pkgrel=3
pkgdesc="Test kernel"
arch=(aarch64)
license=(GPL2)
depends=(
    "coreutils"
    linux-firmware
)
makedepends=(bc "gcc>=12")
provides=("linux=$pkgver")
replaces=(linux-test-git)
source=("https://example.org/linux-$pkgver.tar.xz")

build() {
    make -j$(nproc)
}
"#;

    fn write_recipe(dir: &Path, rel: &str, content: &str) {
        let recipe_dir = dir.join(rel);
        fs::create_dir_all(&recipe_dir).unwrap();
        fs::write(recipe_dir.join("PKGBUILD"), content).unwrap();
    }

    #[test]
    fn test_parse_single_package() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(tmp.path(), "linux/linux-test", SAMPLE);

        let parser = PkgbuildParser::new(tmp.path());
        let recipes = parser.parse("linux/linux-test").unwrap();
        assert_eq!(recipes.len(), 1);

        let recipe = &recipes[0];
        assert_eq!(recipe.name, "linux-test");
        assert_eq!(recipe.version, "6.6.1-3");
        assert_eq!(recipe.repo, "linux");
        assert_eq!(recipe.path, "linux/linux-test");
        assert_eq!(recipe.mode, BuildMode::Cross);
        // depends merges makedepends, quotes stripped, constraints dropped
        assert_eq!(
            recipe.depends,
            vec!["coreutils", "linux-firmware", "bc", "gcc"]
        );
        // $pkgver substituted, constraint stripped
        assert_eq!(recipe.provides, vec!["linux"]);
        assert_eq!(recipe.replaces, vec!["linux-test-git"]);
    }

    #[test]
    fn test_parse_split_package() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(
            tmp.path(),
            "main/utils",
            "_mode=host\npkgname=(utils utils-doc)\npkgver=1.0\npkgrel=1\narch=(any)\nlicense=(MIT)\n",
        );

        let parser = PkgbuildParser::new(tmp.path());
        let recipes = parser.parse("main/utils").unwrap();
        assert_eq!(recipes.len(), 2);
        assert_eq!(recipes[0].name, "utils");
        assert_eq!(recipes[1].name, "utils-doc");
        assert_eq!(recipes[0].version, recipes[1].version);
    }

    #[test]
    fn test_missing_pkgver_is_discovery_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(tmp.path(), "main/broken", "pkgname=broken\npkgrel=1\n");

        let parser = PkgbuildParser::new(tmp.path());
        let err = parser.parse("main/broken").unwrap_err();
        assert!(matches!(err, Error::DiscoveryError(_)));
    }

    #[test]
    fn test_lint_clean_file() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(tmp.path(), "linux/linux-test", SAMPLE);
        let problems = lint(
            &tmp.path().join("linux/linux-test/PKGBUILD"),
            &["x86_64", "aarch64"],
        )
        .unwrap();
        assert!(problems.is_empty(), "unexpected findings: {:?}", problems);
    }

    #[test]
    fn test_lint_finds_tabs_and_missing_vars() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(tmp.path(), "main/bad", "pkgname=bad\n\tpkgver=1\n");
        let problems = lint(&tmp.path().join("main/bad/PKGBUILD"), &["x86_64"]).unwrap();
        assert!(problems.iter().any(|p| p.contains("tab")));
        assert!(problems.iter().any(|p| p.contains("_mode")));
    }

    #[test]
    fn test_lint_arches_hint() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(
            tmp.path(),
            "main/partial",
            "_mode=host\npkgname=partial\npkgver=1\npkgrel=1\n_arches=all\narch=(x86_64)\nlicense=(MIT)\n",
        );
        let problems = lint(
            &tmp.path().join("main/partial/PKGBUILD"),
            &["x86_64", "aarch64"],
        )
        .unwrap();
        assert!(problems.iter().any(|p| p.contains("aarch64")));
    }
}
