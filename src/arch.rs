// src/arch.rs

//! Target architecture identifiers
//!
//! The set of supported architectures is closed: every arch the orchestrator
//! can build for is a variant here. Exactly one element is the host arch and
//! one (possibly the same) is the target arch of a build invocation.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "aarch64")]
    Aarch64,
}

impl Arch {
    /// All supported architectures
    pub const ALL: [Arch; 2] = [Arch::X86_64, Arch::Aarch64];

    pub fn name(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }

    /// GNU triple, used for the emulator loader prefix inside foreign builds
    pub fn triple(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64-unknown-linux-gnu",
            Arch::Aarch64 => "aarch64-unknown-linux-gnu",
        }
    }

    /// Toolchain tuple prefix of a cross compiler running on `host` and
    /// targeting `self`, matching the distribution's toolchain package names.
    pub fn gcc_hostspec(&self, host: Arch) -> &'static str {
        match (host, *self) {
            (Arch::X86_64, Arch::X86_64) => "x86_64-pc-linux-gnu",
            (Arch::X86_64, Arch::Aarch64) => "aarch64-linux-gnu",
            (Arch::Aarch64, Arch::Aarch64) => "aarch64-unknown-linux-gnu",
            (Arch::Aarch64, Arch::X86_64) => "x86_64-linux-gnu",
        }
    }

    /// Name of the cross gcc package for building `self` binaries on `host`
    pub fn cross_gcc_package(&self, host: Arch) -> String {
        format!("{}-gcc", self.gcc_hostspec(host))
    }

    /// The architecture this process is running on
    pub fn this_machine() -> Result<Arch> {
        std::env::consts::ARCH.parse()
    }

    fn choices() -> String {
        Arch::ALL
            .iter()
            .map(|a| a.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Arch> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "aarch64" => Ok(Arch::Aarch64),
            _ => Err(Error::ConfigError(format!(
                "Unknown architecture \"{}\". Choices: {}",
                s,
                Arch::choices()
            ))),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_names() {
        for arch in Arch::ALL {
            assert_eq!(arch.name().parse::<Arch>().unwrap(), arch);
        }
    }

    #[test]
    fn test_unknown_arch_rejected() {
        let err = "riscv64".parse::<Arch>().unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(err.to_string().contains("riscv64"));
    }

    #[test]
    fn test_cross_gcc_package() {
        assert_eq!(
            Arch::Aarch64.cross_gcc_package(Arch::X86_64),
            "aarch64-linux-gnu-gcc"
        );
    }

    #[test]
    fn test_this_machine_is_known() {
        // CI runs on one of the supported arches
        assert!(Arch::this_machine().is_ok());
    }
}
