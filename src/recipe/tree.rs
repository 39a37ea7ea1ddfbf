// src/recipe/tree.rs

//! PKGBUILDs tree management
//!
//! The recipes tree is a git checkout. `ensure_cloned` makes sure it exists
//! before discovery; `update` additionally pulls and can switch branches;
//! `clean` removes untracked build droppings.

use crate::config::Config;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

fn git(args: &[&str], dir: Option<&Path>) -> Result<std::process::Output> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.args(args)
        .output()
        .map_err(|e| Error::IoError(format!("Failed to run git: {}", e)))
}

/// Ask the user a yes/no question on stdin. Defaults to `default` on EOF.
pub fn confirm(prompt: &str, default: bool) -> bool {
    print!("{} [{}] ", prompt, if default { "Y/n" } else { "y/N" });
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return default;
    }
    match answer.trim() {
        "" => default,
        "y" | "Y" | "yes" => true,
        _ => false,
    }
}

/// Clone the PKGBUILDs repository if the checkout does not exist yet.
pub fn ensure_cloned(config: &Config) -> Result<()> {
    let dir = config.pkgbuilds_dir();
    if dir.join(".git").exists() {
        return Ok(());
    }
    let repo = config.pkgbuilds.git_repo.as_str();
    let branch = config.pkgbuilds.git_branch.as_str();
    info!("Cloning branch {} from {}", branch, repo);
    let dir_str = dir.to_string_lossy();
    let output = git(&["clone", "-b", branch, repo, dir_str.as_ref()], None)?;
    if !output.status.success() {
        return Err(Error::DiscoveryError(format!(
            "Failed to clone PKGBUILDs repository: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Bring the PKGBUILDs tree up to date. Interactive mode asks before
/// switching a mismatched branch or pulling.
pub fn update(config: &Config, interactive: bool) -> Result<()> {
    let dir = config.pkgbuilds_dir();
    if !dir.join(".git").exists() {
        return ensure_cloned(config);
    }

    let branch = &config.pkgbuilds.git_branch;
    let output = git(&["branch", "--show-current"], Some(dir))?;
    let current = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if current != *branch {
        warn!(
            "PKGBUILDs repository is on the wrong branch: {}, requested: {}",
            current, branch
        );
        if interactive && confirm("Switch branches?", false) {
            let output = git(&["switch", branch], Some(dir))?;
            if !output.status.success() {
                return Err(Error::DiscoveryError(
                    "Failed to switch PKGBUILDs branch".to_string(),
                ));
            }
        }
    }

    if interactive && !confirm("Update the PKGBUILDs repository?", true) {
        return Ok(());
    }
    info!("Updating PKGBUILDs repository");
    let output = git(&["pull"], Some(dir))?;
    if !output.status.success() {
        return Err(Error::DiscoveryError(format!(
            "Failed to update PKGBUILDs repository: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// What `clean` should remove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    /// Everything untracked, via `git clean`
    All,
    /// Extracted source directories
    Src,
    /// Staged package directories
    Pkg,
}

impl std::str::FromStr for CleanTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<CleanTarget> {
        match s {
            "all" => Ok(CleanTarget::All),
            "src" => Ok(CleanTarget::Src),
            "pkg" => Ok(CleanTarget::Pkg),
            _ => Err(Error::ConfigError(format!(
                "Unknown clean target \"{}\". Choices: all, src, pkg",
                s
            ))),
        }
    }
}

/// Remove build droppings from the PKGBUILDs tree.
pub fn clean(config: &Config, targets: &[CleanTarget], force: bool, noop: bool) -> Result<()> {
    let dir = config.pkgbuilds_dir();
    if targets.contains(&CleanTarget::All) {
        if !(noop
            || force
            || confirm(
                "Really reset the PKGBUILDs tree to its git state? \
                 This erases all untracked changes.",
                false,
            ))
        {
            return Ok(());
        }
        let flags = if noop { "-dffXn" } else { "-dffX" };
        let mut args = vec!["clean", flags];
        let repos: Vec<&str> = config.repositories().iter().map(String::as_str).collect();
        args.extend(repos);
        let output = git(&args, Some(dir))?;
        print!("{}", String::from_utf8_lossy(&output.stdout));
        if !output.status.success() {
            return Err(Error::DiscoveryError("Failed to git clean".to_string()));
        }
        return Ok(());
    }

    let mut dirs = Vec::new();
    for target in targets {
        let subdir = match target {
            CleanTarget::Src => "src",
            CleanTarget::Pkg => "pkg",
            CleanTarget::All => unreachable!(),
        };
        let pattern = format!("{}/*/*/{}", dir.display(), subdir);
        debug!("Gathering {} directories", subdir);
        for entry in glob::glob(&pattern)
            .map_err(|e| Error::DiscoveryError(format!("Bad glob pattern: {}", e)))?
        {
            match entry {
                Ok(path) if path.is_dir() => dirs.push(path),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable path: {}", e),
            }
        }
    }

    let verb = if noop { "Would remove" } else { "Removing" };
    for dir in &dirs {
        info!("{} {}", verb, dir.display());
    }
    if dirs.is_empty() || noop {
        return Ok(());
    }
    if !(force || confirm("Really remove all of these?", true)) {
        return Ok(());
    }
    for dir in dirs {
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}
