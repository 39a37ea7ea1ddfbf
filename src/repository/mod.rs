// src/repository/mod.rs

//! Package repositories: remote index scanning and local publication

pub mod distro;
pub mod index;
pub mod publish;

pub use distro::{Distro, local_distro, remote_distro};
pub use index::{RepoIndex, RepoRecord, resolve_url};
pub use publish::{Publisher, strip_compression_suffix};
