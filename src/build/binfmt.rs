// src/build/binfmt.rs

//! qemu binfmt registration
//!
//! Foreign-arch chroots rely on the kernel dispatching their binaries to
//! qemu-user. The registration lines ship with the qemu binfmt package under
//! /usr/lib/binfmt.d; this module feeds them to the binfmt_misc registry.

use crate::arch::Arch;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

const BINFMT_DIR: &str = "/usr/lib/binfmt.d";
const BINFMT_MISC: &str = "/proc/sys/fs/binfmt_misc";

fn conf_path(arch: Arch) -> String {
    format!("{}/qemu-{}-static.conf", BINFMT_DIR, arch)
}

/// Whether a handler for `arch` is already registered with the kernel
pub fn is_registered(arch: Arch) -> bool {
    Path::new(BINFMT_MISC)
        .join(format!("qemu-{}", arch))
        .exists()
}

/// Register the qemu-user handler for `arch` from its binfmt.d config.
/// Already-registered handlers are left alone.
pub fn register(arch: Arch) -> Result<()> {
    if is_registered(arch) {
        debug!("binfmt handler for {} already registered", arch);
        return Ok(());
    }
    let conf = conf_path(arch);
    let lines = std::fs::read_to_string(&conf).map_err(|e| {
        Error::BuildError(format!(
            "Cannot read binfmt config {} (is the qemu binfmt package installed?): {}",
            conf, e
        ))
    })?;

    let register = Path::new(BINFMT_MISC).join("register");
    for line in lines.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        info!("Registering binfmt handler for {}", arch);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&register)
            .map_err(|e| {
                Error::BuildError(format!("Cannot open {}: {}", register.display(), e))
            })?;
        file.write_all(line.as_bytes()).map_err(|e| {
            Error::BuildError(format!("Failed to register binfmt handler: {}", e))
        })?;
    }
    Ok(())
}
