//! `steward.toml` project files.

use crate::version::{version_matches, Version};
use crate::PackageError;
use serde::Deserialize;
use std::path::Path;

pub const PROJECT_FILE: &str = "steward.toml";

/// Settings read from the `[steward.project]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSettings {
    #[serde(skip)]
    pub exists: bool,

    pub entry_point: Option<String>,
    /// Requirement list checked against the running engine version.
    pub steward_version: Option<String>,
    #[serde(default)]
    pub steward_requires: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_ssh_timeout")]
    pub ssh_timeout: u64,
}

fn default_ssh_timeout() -> u64 {
    3
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    steward: Option<StewardSection>,
}

#[derive(Debug, Deserialize)]
struct StewardSection {
    project: Option<ProjectSettings>,
}

/// Reads the project file in the given directory. A missing file yields
/// default settings with `exists` unset.
pub fn read_project(dir: &Path) -> Result<ProjectSettings, PackageError> {
    let path = dir.join(PROJECT_FILE);
    if !path.exists() {
        return Ok(ProjectSettings::default());
    }

    tracing::debug!("Reading steward.toml project file.");
    let content = std::fs::read_to_string(&path)?;
    let parsed: ProjectFile = toml::from_str(&content)?;
    match parsed.steward.and_then(|s| s.project) {
        Some(mut settings) => {
            settings.exists = true;
            Ok(settings)
        }
        None => {
            tracing::debug!("No project settings.");
            Ok(ProjectSettings::default())
        }
    }
}

impl ProjectSettings {
    /// Checks the engine version against the project's requirement list.
    pub fn check_engine_version(&self, engine_version: &str) -> Result<(), PackageError> {
        let Some(requirements) = &self.steward_version else {
            return Ok(());
        };
        let version = Version::parse(engine_version)?;
        if !version_matches(&version, requirements)? {
            return Err(PackageError::EngineVersionMismatch {
                required: requirements.clone(),
                running: engine_version.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_project(dir.path()).unwrap();
        assert!(!settings.exists);
        assert_eq!(settings.ssh_timeout, 3);
        assert!(!settings.dry_run);
    }

    #[test]
    fn parses_project_section() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_FILE),
            r#"
[steward.project]
entry_point = "main.stw"
steward_version = ">=0.1,<1.0"
steward_requires = ["net==1.2.3"]
dry_run = true
ssh_timeout = 10
"#,
        )
        .unwrap();

        let settings = read_project(dir.path()).unwrap();
        assert!(settings.exists);
        assert_eq!(settings.entry_point.as_deref(), Some("main.stw"));
        assert_eq!(settings.steward_requires, vec!["net==1.2.3"]);
        assert!(settings.dry_run);
        assert_eq!(settings.ssh_timeout, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_FILE),
            "[steward.project]\ntypo_field = 1\n",
        )
        .unwrap();
        assert!(read_project(dir.path()).is_err());
    }

    #[test]
    fn engine_version_gate() {
        let settings = ProjectSettings {
            steward_version: Some(">=0.3,<0.9".to_string()),
            ..Default::default()
        };
        assert!(settings.check_engine_version("0.3.0").is_ok());
        assert!(settings.check_engine_version("0.9.0").is_err());
    }
}
