use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Maven-style `group:artifact:version` coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl Coordinate {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    /// Identity used for de-duplication: versions of the same artifact
    /// collapse to the one seen first.
    pub fn key(&self) -> String {
        format!("{}:{}", self.group, self.artifact)
    }

    /// `{group with '.' as '/'}/{artifact}/{version}`, the artifact's
    /// directory in both the repository and the local cache.
    pub fn relative_dir(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group.replace('.', "/"),
            self.artifact,
            self.version
        )
    }

    pub fn local_dir(&self) -> PathBuf {
        self.relative_dir().split('/').collect()
    }

    pub fn descriptor_name(&self) -> String {
        format!("{}-{}.json", self.artifact, self.version)
    }
}

impl FromStr for Coordinate {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let valid = parts.len() == 3
            && parts
                .iter()
                .all(|p| !p.is_empty() && !p.contains('/') && !p.contains('\\') && *p != "..");
        if !valid {
            return Err(DriverError::ArtifactResolutionFailure {
                coordinate: s.to_string(),
                reason: "expected group:artifact:version".to_string(),
            });
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

/// Artifact descriptor published next to every module in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// File name of the module inside the artifact directory.
    pub file: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ArtifactDescriptor {
    pub fn validate(&self) -> Result<(), String> {
        let file = self.file.as_str();
        if file.is_empty() || file.contains('/') || file.contains('\\') || file == ".." || file == "." {
            return Err(format!("invalid artifact file name '{}'", file));
        }
        Ok(())
    }
}
