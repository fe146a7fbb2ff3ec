//! Paths inside a game's virtual file tree

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::{is_contained, normalize_resource_name};

/// An archive inside a game installation and the format that reads it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawArchiveLocation")]
pub struct ArchiveLocation {
    /// Archive path relative to the installation root, forward slashes
    pub path: String,
    /// Id of the [`ArchiveDataManager`](crate::archive::ArchiveDataManager) for it
    pub manager_id: String,
}

impl ArchiveLocation {
    pub fn new(path: impl Into<String>, manager_id: impl Into<String>) -> Self {
        Self {
            path: path.into().replace('\\', "/"),
            manager_id: manager_id.into(),
        }
    }

    /// Case-insensitive identity of the archive
    #[must_use]
    pub fn key(&self) -> String {
        normalize_resource_name(&self.path)
    }

    /// Check that the archive lies inside the installation root
    ///
    /// # Errors
    /// Returns [`Error::InvalidPath`] for empty or absolute paths and `..` segments.
    pub fn validate(&self) -> Result<()> {
        if is_contained(&self.path) {
            Ok(())
        } else {
            Err(Error::InvalidPath(format!(
                "archive {} is outside the installation",
                self.path
            )))
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArchiveLocation {
    path: String,
    manager_id: String,
}

impl TryFrom<RawArchiveLocation> for ArchiveLocation {
    type Error = Error;

    fn try_from(raw: RawArchiveLocation) -> Result<Self> {
        let location = Self::new(raw.path, raw.manager_id);
        location.validate()?;
        Ok(location)
    }
}

/// A file in the game's tree, optionally inside one of its archives.
///
/// Equality and ordering of patch operations go through [`key`](Self::key), which is
/// case-insensitive; `file_path` keeps the author's casing for new archive entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawModFilePath")]
pub struct ModFilePath {
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveLocation>,
}

impl ModFilePath {
    /// A loose file relative to the installation root
    pub fn loose(file_path: impl Into<String>) -> Self {
        Self {
            file_path: clean(&file_path.into()),
            archive: None,
        }
    }

    /// A file inside `archive`
    pub fn in_archive(file_path: impl Into<String>, archive: ArchiveLocation) -> Self {
        Self {
            file_path: clean(&file_path.into()),
            archive: Some(archive),
        }
    }

    /// Case-insensitive identity, e.g. `archives/data.cnt/data/level1.bin`
    #[must_use]
    pub fn key(&self) -> String {
        match &self.archive {
            Some(archive) => format!(
                "archives/{}/{}",
                archive.key(),
                normalize_resource_name(&self.file_path)
            ),
            None => format!("files/{}", normalize_resource_name(&self.file_path)),
        }
    }

    /// Normalized name under which this file's bytes are stored in a package
    #[must_use]
    pub fn resource_name(&self) -> String {
        self.key()
    }

    /// Key of the containing archive (`None` for loose files)
    #[must_use]
    pub fn archive_key(&self) -> Option<String> {
        self.archive.as_ref().map(ArchiveLocation::key)
    }

    /// Check that the path cannot reach outside the installation. Names inside an
    /// archive are only table entries, so only the archive itself is checked.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPath`] if the loose file or archive escapes the root.
    pub fn validate(&self) -> Result<()> {
        match &self.archive {
            Some(archive) => archive.validate(),
            None if is_contained(&self.file_path) => Ok(()),
            None => Err(Error::InvalidPath(format!(
                "{} is outside the installation",
                self.file_path
            ))),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModFilePath {
    file_path: String,
    #[serde(default)]
    archive: Option<ArchiveLocation>,
}

impl TryFrom<RawModFilePath> for ModFilePath {
    type Error = Error;

    fn try_from(raw: RawModFilePath) -> Result<Self> {
        let path = Self {
            file_path: clean(&raw.file_path),
            archive: raw.archive,
        };
        path.validate()?;
        Ok(path)
    }
}

impl fmt::Display for ModFilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.archive {
            Some(archive) => write!(f, "{}:{}", archive.path, self.file_path),
            None => f.write_str(&self.file_path),
        }
    }
}

fn clean(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}
