//! Building, installing and uninstalling package archives.

use crate::{PackageError, PROJECT_FILE};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Archive name suffix: `<name>[-<version>].stw.tar.gz`.
pub const ARCHIVE_SUFFIX: &str = ".stw.tar.gz";

/// The `[steward.package]` section of a package's steward.toml.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageData {
    pub name: String,
    pub source_dir: PathBuf,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

impl PackageData {
    /// Directory name used under the store's lib directory.
    pub fn name_with_version(&self) -> String {
        match &self.version {
            Some(version) => format!("{}-{}", self.name, version),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackageFile {
    steward: Option<PackageSection>,
}

#[derive(Debug, Deserialize)]
struct PackageSection {
    package: Option<PackageData>,
}

fn read_package_toml(path: &Path) -> Result<PackageData, PackageError> {
    tracing::debug!("Reading steward.toml package file.");
    let content = fs::read_to_string(path)?;
    let parsed: PackageFile = toml::from_str(&content)?;
    parsed
        .steward
        .and_then(|s| s.package)
        .ok_or(PackageError::MissingPackageSection)
}

/// The package manager's on-disk state: a download cache and the lib
/// directory installed packages live in. Constructed at startup and passed
/// down explicitly.
#[derive(Debug, Clone)]
pub struct PackageStore {
    pub cache_dir: PathBuf,
    pub lib_dir: PathBuf,
}

impl PackageStore {
    /// Store rooted at the user's data directory.
    pub fn open_default() -> Result<Self, PackageError> {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("steward");
        Self::open(&root)
    }

    pub fn open(root: &Path) -> Result<Self, PackageError> {
        let store = Self {
            cache_dir: root.join("cache"),
            lib_dir: root.join("lib"),
        };
        fs::create_dir_all(&store.cache_dir)?;
        fs::create_dir_all(&store.lib_dir)?;
        Ok(store)
    }

    /// All installed packages, read from the lib directory.
    pub fn index(&self) -> Result<Vec<PackageData>, PackageError> {
        let mut packages = Vec::new();
        for entry in fs::read_dir(&self.lib_dir)? {
            let entry = entry?;
            let toml_path = entry.path().join(PROJECT_FILE);
            if toml_path.is_file() {
                packages.push(read_package_toml(&toml_path)?);
            }
        }
        Ok(packages)
    }

    /// Source directories of installed packages, for the module search
    /// path.
    pub fn source_paths(&self) -> Result<Vec<PathBuf>, PackageError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.lib_dir)? {
            let entry = entry?;
            if entry.path().join(PROJECT_FILE).is_file() {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }

    /// Builds a distributable archive from a directory containing a
    /// steward.toml. Returns the archive path under `<dir>/dist/`.
    pub fn build(&self, project_dir: &Path) -> Result<PathBuf, PackageError> {
        tracing::info!("Building package.");
        let toml_path = project_dir.join(PROJECT_FILE);
        if !toml_path.exists() {
            return Err(PackageError::MissingProjectFile);
        }
        let data = read_package_toml(&toml_path)?;

        let source_dir = project_dir.join(&data.source_dir);
        if !source_dir.is_dir() {
            return Err(PackageError::BadArchive {
                reason: format!("no such source directory: '{}'", data.source_dir.display()),
            });
        }

        let dist = project_dir.join("dist");
        fs::create_dir_all(&dist)?;

        let dist_name = data.name_with_version();
        let archive_path = dist.join(format!("{dist_name}{ARCHIVE_SUFFIX}"));

        tracing::debug!("Creating tar archive.");
        let file = fs::File::create(&archive_path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut archive = tar::Builder::new(encoder);
        archive.append_path_with_name(&toml_path, format!("{dist_name}/{PROJECT_FILE}"))?;
        archive.append_dir_all(
            format!("{}/{}", dist_name, data.source_dir.display()),
            &source_dir,
        )?;
        archive.into_inner()?.finish()?;

        tracing::info!("Built package '{dist_name}'.");
        Ok(archive_path)
    }

    /// Installs a package from a local archive path, an http(s) URL or a
    /// git URL.
    pub fn install(&self, spec: &str) -> Result<PackageData, PackageError> {
        if spec.starts_with("http://") || spec.starts_with("https://") {
            let archive = self.download(spec)?;
            return self.install_archive(&archive);
        }
        if spec.starts_with("git+") || spec.ends_with(".git") {
            return self.install_git(spec.trim_start_matches("git+"));
        }

        let path = PathBuf::from(spec);
        if path.is_file() {
            return self.install_archive(&path);
        }
        Err(PackageError::NoSuchSource {
            spec: spec.to_string(),
        })
    }

    fn download(&self, url: &str) -> Result<PathBuf, PackageError> {
        tracing::info!("Downloading '{url}'.");
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("package.stw.tar.gz");
        let target = self.cache_dir.join(file_name);

        let response = ureq::get(url).call().map_err(|e| PackageError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let mut reader = response.into_reader();
        let mut file = fs::File::create(&target)?;
        std::io::copy(&mut reader, &mut file)?;
        Ok(target)
    }

    fn install_archive(&self, archive_path: &Path) -> Result<PackageData, PackageError> {
        tracing::info!("Installing '{}'.", archive_path.display());
        let file = fs::File::open(archive_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(&self.lib_dir)?;

        // The archive holds one top-level directory named after the
        // package.
        let top = archive_file_stem(archive_path)?;
        let installed = self.lib_dir.join(&top);
        let data = read_package_toml(&installed.join(PROJECT_FILE))?;
        tracing::info!("Installed package '{}'.", data.name);
        Ok(data)
    }

    fn install_git(&self, url: &str) -> Result<PackageData, PackageError> {
        tracing::info!("Cloning '{url}'.");
        let checkout = self.cache_dir.join("git-checkout");
        if checkout.exists() {
            fs::remove_dir_all(&checkout)?;
        }

        let status = std::process::Command::new("git")
            .arg("clone")
            .arg("--depth=1")
            .arg(url)
            .arg(&checkout)
            .status()
            .map_err(|e| PackageError::Git {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(PackageError::Git {
                url: url.to_string(),
                reason: format!("git exited with {status}"),
            });
        }

        let data = read_package_toml(&checkout.join(PROJECT_FILE))?;
        let target = self.lib_dir.join(data.name_with_version());
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::create_dir_all(&target)?;
        fs::rename(checkout.join(PROJECT_FILE), target.join(PROJECT_FILE))?;
        let source = checkout.join(&data.source_dir);
        copy_dir(&source, &target.join(&data.source_dir))?;
        fs::remove_dir_all(&checkout)?;

        tracing::info!("Installed package '{}'.", data.name);
        Ok(data)
    }

    pub fn uninstall(&self, name: &str) -> Result<(), PackageError> {
        for entry in fs::read_dir(&self.lib_dir)? {
            let entry = entry?;
            let toml_path = entry.path().join(PROJECT_FILE);
            if !toml_path.is_file() {
                continue;
            }
            let data = read_package_toml(&toml_path)?;
            if data.name == name {
                fs::remove_dir_all(entry.path())?;
                tracing::info!("Uninstalled package '{name}'.");
                return Ok(());
            }
        }
        Err(PackageError::NotInstalled {
            name: name.to_string(),
        })
    }
}

fn archive_file_stem(path: &Path) -> Result<String, PackageError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PackageError::BadArchive {
            reason: format!("unreadable archive name: '{}'", path.display()),
        })?;
    name.strip_suffix(ARCHIVE_SUFFIX)
        .map(str::to_string)
        .ok_or_else(|| PackageError::BadArchive {
            reason: format!("archive name '{name}' does not end in '{ARCHIVE_SUFFIX}'"),
        })
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), PackageError> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
