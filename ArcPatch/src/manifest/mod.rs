//! Patch, history and container manifests
//!
//! All manifests are JSON with camelCase keys. Optional arrays are `Option<Vec<_>>`
//! and are omitted when `None`, so an absent list and an empty list stay distinct.

mod mod_path;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::archive::FileEntry;
use crate::error::{Error, Result};
use crate::utils::Checksum;

pub use mod_path::{ArchiveLocation, ModFilePath};

/// Newest patch manifest format this library reads and writes
pub const PATCH_FORMAT_VERSION: u64 = 1;

/// Newest container manifest format this library reads and writes
pub const CONTAINER_VERSION: u64 = 1;

/// Reject documents written by a newer version before touching anything else
fn read_version(value: &Value, field: &str, kind: &'static str, supported: u64) -> Result<u64> {
    let found = value
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::InvalidManifest(format!("{kind} manifest has no {field}")))?;
    if found > supported {
        return Err(Error::UnsupportedFormatVersion {
            kind,
            found,
            supported,
        });
    }
    Ok(found)
}

fn ensure_checksum_count(
    what: &str,
    files: &[ModFilePath],
    checksums: Option<&Vec<Checksum>>,
) -> Result<()> {
    match checksums {
        Some(sums) if sums.len() != files.len() => Err(Error::InvalidManifest(format!(
            "{} {what} but {} checksums",
            files.len(),
            sums.len()
        ))),
        _ => Ok(()),
    }
}

/// A structured edit recorded in a patch: the payload in `resource` is handed to
/// `module` to transform `target` at apply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePatchRecord {
    pub target: ModFilePath,
    pub module: String,
    pub resource: String,
}

/// Identity and content list of one distributable patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchManifest {
    pub id: Uuid,
    pub format_version: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub total_size: u64,
    pub modified_date: DateTime<Utc>,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub game_ids: Vec<String>,
    #[serde(default)]
    pub added_files: Vec<ModFilePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_file_checksums: Option<Vec<Checksum>>,
    #[serde(default)]
    pub removed_files: Vec<ModFilePath>,
    #[serde(default)]
    pub patched_files: Vec<FilePatchRecord>,
    #[serde(default, rename = "hasAssets")]
    pub assets: Vec<String>,
}

impl PatchManifest {
    /// A new, empty manifest with a random id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            format_version: PATCH_FORMAT_VERSION,
            name: name.into(),
            description: String::new(),
            author: None,
            total_size: 0,
            modified_date: Utc::now(),
            revision: 0,
            game_ids: Vec::new(),
            added_files: Vec::new(),
            added_file_checksums: None,
            removed_files: Vec::new(),
            patched_files: Vec::new(),
            assets: Vec::new(),
        }
    }

    /// Parse and validate a manifest
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedFormatVersion`] for manifests from a newer version,
    /// and [`Error::InvalidManifest`] for structurally invalid ones.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(data)?;
        Self::from_value(value)
    }

    pub(crate) fn from_value(value: Value) -> Result<Self> {
        read_version(&value, "formatVersion", "patch", PATCH_FORMAT_VERSION)?;
        let manifest: Self = serde_json::from_value(value)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the manifest's internal consistency
    ///
    /// # Errors
    /// Returns [`Error::InvalidManifest`] describing the first problem found, or
    /// [`Error::InvalidPath`] for a path outside the installation.
    pub fn validate(&self) -> Result<()> {
        ensure_checksum_count(
            "added files",
            &self.added_files,
            self.added_file_checksums.as_ref(),
        )?;

        for path in self
            .added_files
            .iter()
            .chain(&self.removed_files)
            .chain(self.patched_files.iter().map(|record| &record.target))
        {
            path.validate()?;
        }

        let mut seen = HashSet::new();
        for path in self.added_files.iter().chain(&self.removed_files) {
            if !seen.insert(path.key()) {
                return Err(Error::InvalidManifest(format!(
                    "{path} is listed more than once"
                )));
            }
        }
        Ok(())
    }

    /// Checksum recorded for an added file, if any
    #[must_use]
    pub fn checksum_for(&self, path: &ModFilePath) -> Option<Checksum> {
        let key = path.key();
        let index = self.added_files.iter().position(|p| p.key() == key)?;
        self.added_file_checksums
            .as_ref()
            .and_then(|sums| sums.get(index).copied())
    }

    /// Whether this patch declares support for `game_id` (no ids means any game)
    #[must_use]
    pub fn targets_game(&self, game_id: &str) -> bool {
        self.game_ids.is_empty() || self.game_ids.iter().any(|g| g.eq_ignore_ascii_case(game_id))
    }
}

/// Original position and encoding of an archive file the applied patches replaced
/// or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PristineEntry {
    pub path: ModFilePath,
    /// Index in the pristine archive's file table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<FileEntry>,
}

/// The aggregate delta currently applied to an installation, relative to its
/// pristine state. This is the only record of what a restore must undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchHistoryManifest {
    pub id: Uuid,
    #[serde(default)]
    pub total_size: u64,
    pub modified_date: DateTime<Utc>,
    #[serde(default)]
    pub added_files: Vec<ModFilePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_file_checksums: Option<Vec<Checksum>>,
    #[serde(default)]
    pub replaced_files: Vec<ModFilePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_file_checksums: Option<Vec<Checksum>>,
    #[serde(default)]
    pub removed_files: Vec<ModFilePath>,
    #[serde(default)]
    pub pristine_entries: Vec<PristineEntry>,
}

impl Default for PatchHistoryManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchHistoryManifest {
    /// An empty history: nothing applied
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            total_size: 0,
            modified_date: Utc::now(),
            added_files: Vec::new(),
            added_file_checksums: None,
            replaced_files: Vec::new(),
            replaced_file_checksums: None,
            removed_files: Vec::new(),
            pristine_entries: Vec::new(),
        }
    }

    /// Whether the installation is in its pristine state
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_files.is_empty() && self.replaced_files.is_empty() && self.removed_files.is_empty()
    }

    /// Pristine record for a replaced or removed path
    #[must_use]
    pub fn pristine(&self, path: &ModFilePath) -> Option<&PristineEntry> {
        let key = path.key();
        self.pristine_entries.iter().find(|p| p.path.key() == key)
    }

    /// Every path the history touches, in list order
    pub fn touched(&self) -> impl Iterator<Item = &ModFilePath> {
        self.added_files
            .iter()
            .chain(&self.replaced_files)
            .chain(&self.removed_files)
    }

    /// Check the history's internal consistency
    ///
    /// # Errors
    /// Returns [`Error::InvalidManifest`] if a path is in more than one list or a
    /// checksum list does not line up with its files.
    pub fn validate(&self) -> Result<()> {
        ensure_checksum_count("added files", &self.added_files, self.added_file_checksums.as_ref())?;
        ensure_checksum_count(
            "replaced files",
            &self.replaced_files,
            self.replaced_file_checksums.as_ref(),
        )?;

        let mut seen = HashSet::new();
        for path in self.touched() {
            path.validate()?;
            if !seen.insert(path.key()) {
                return Err(Error::InvalidManifest(format!(
                    "history lists {path} more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Everything a patch container knows about its installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchContainerManifest {
    pub container_version: u64,
    pub history: PatchHistoryManifest,
    #[serde(default)]
    pub patches: Vec<PatchManifest>,
    /// Enabled patch ids in application order. `None` means every patch, in
    /// `patches` order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_patches: Option<Vec<Uuid>>,
}

impl Default for PatchContainerManifest {
    fn default() -> Self {
        Self {
            container_version: CONTAINER_VERSION,
            history: PatchHistoryManifest::new(),
            patches: Vec::new(),
            enabled_patches: Some(Vec::new()),
        }
    }
}

impl PatchContainerManifest {
    /// Parse and validate a container manifest
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedFormatVersion`] if the container or any patch in it
    /// comes from a newer version; nothing is partially read in that case.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(data)?;
        read_version(&value, "containerVersion", "patch container", CONTAINER_VERSION)?;
        if let Some(patches) = value.get("patches").and_then(Value::as_array) {
            for patch in patches {
                read_version(patch, "formatVersion", "patch", PATCH_FORMAT_VERSION)?;
            }
        }

        let manifest: Self = serde_json::from_value(value)?;
        manifest.history.validate()?;
        for patch in &manifest.patches {
            patch.validate()?;
        }
        Ok(manifest)
    }

    /// Enabled patch ids in application order
    #[must_use]
    pub fn enabled_ids(&self) -> Vec<Uuid> {
        match &self.enabled_patches {
            Some(ids) => ids
                .iter()
                .copied()
                .filter(|id| self.patches.iter().any(|p| p.id == *id))
                .collect(),
            None => self.patches.iter().map(|p| p.id).collect(),
        }
    }
}
