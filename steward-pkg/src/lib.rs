//! Project files and package management for Steward.
//!
//! A package is a gzipped tar archive of a directory holding a
//! `steward.toml` with an `[steward.package]` section plus the package's
//! source directory. Installed packages land in the store's lib directory,
//! which the compiler appends to its module search path.

pub mod package;
pub mod project;
pub mod version;

pub use package::{PackageData, PackageStore};
pub use project::{read_project, ProjectSettings, PROJECT_FILE};
pub use version::{split_requirement, version_matches, Version};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Failed to read package data: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse steward.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse version '{version}'")]
    InvalidVersion { version: String },

    #[error("Failed to parse version requirement '{requirement}'")]
    InvalidRequirement { requirement: String },

    #[error("This project requires steward {required}, but {running} is running")]
    EngineVersionMismatch { required: String, running: String },

    #[error("steward.toml file missing")]
    MissingProjectFile,

    #[error("steward.toml does not contain an '[steward.package]' section")]
    MissingPackageSection,

    #[error("No such package source: '{spec}'")]
    NoSuchSource { spec: String },

    #[error("Failed to download '{url}': {reason}")]
    Download { url: String, reason: String },

    #[error("Failed to clone '{url}': {reason}")]
    Git { url: String, reason: String },

    #[error("Package '{name}' is not installed")]
    NotInstalled { name: String },

    #[error("Malformed package archive: {reason}")]
    BadArchive { reason: String },
}
