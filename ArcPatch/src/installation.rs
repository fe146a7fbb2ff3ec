//! The game installation a patch container belongs to

use std::path::PathBuf;

use crate::container::PatchContainer;
use crate::error::{Error, Result};
use crate::manifest::{ArchiveLocation, ModFilePath};

/// A game installation: its root directory and the archives inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInstallation {
    /// Game id matched against a patch's `gameIds`
    pub game_id: String,
    pub root: PathBuf,
    /// Archives patches may target, relative to `root`
    pub archives: Vec<ArchiveLocation>,
}

impl GameInstallation {
    pub fn new(game_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            game_id: game_id.into(),
            root: root.into(),
            archives: Vec::new(),
        }
    }

    /// Declare an archive of the installation
    #[must_use]
    pub fn with_archive(mut self, archive: ArchiveLocation) -> Self {
        if !self.archives.iter().any(|a| a.key() == archive.key()) {
            self.archives.push(archive);
        }
        self
    }

    /// Location of the installation's patch container (`<root>.gpc`)
    #[must_use]
    pub fn container_path(&self) -> PathBuf {
        PatchContainer::path_for_installation(&self.root)
    }

    /// Absolute path of an archive
    ///
    /// # Errors
    /// Returns [`Error::InvalidPath`] if the archive path escapes the root.
    pub fn archive_path(&self, archive: &ArchiveLocation) -> Result<PathBuf> {
        archive.validate()?;
        Ok(self.root.join(&archive.path))
    }

    /// Absolute path of a loose file
    ///
    /// # Errors
    /// Returns [`Error::InvalidPath`] for archive paths or paths escaping the root.
    pub fn loose_path(&self, path: &ModFilePath) -> Result<PathBuf> {
        if path.archive.is_some() {
            return Err(Error::InvalidPath(format!("{path} is inside an archive")));
        }
        path.validate()?;
        Ok(self.root.join(&path.file_path))
    }

    /// Find a declared archive by path, case-insensitively
    #[must_use]
    pub fn archive(&self, path: &str) -> Option<&ArchiveLocation> {
        let key = ArchiveLocation::new(path, "").key();
        self.archives.iter().find(|a| a.key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let install = GameInstallation::new("rayman2", "/games/r2")
            .with_archive(ArchiveLocation::new("Data\\Fix.cnt", "cnt"))
            .with_archive(ArchiveLocation::new("data/fix.cnt", "cnt"));

        assert_eq!(install.archives.len(), 1);
        assert_eq!(install.container_path(), PathBuf::from("/games/r2.gpc"));
        assert_eq!(
            install.archive_path(&install.archives[0]).unwrap(),
            PathBuf::from("/games/r2/Data/Fix.cnt")
        );
        assert!(install.archive("DATA/FIX.CNT").is_some());
        assert_eq!(
            install.loose_path(&ModFilePath::loose("cfg/game.ini")).unwrap(),
            PathBuf::from("/games/r2/cfg/game.ini")
        );
    }

    #[test]
    fn test_loose_path_rejects_escapes() {
        let install = GameInstallation::new("g", "/games/g");
        assert!(install.loose_path(&ModFilePath::loose("../outside.txt")).is_err());
        let in_archive = ModFilePath::in_archive("a.bin", ArchiveLocation::new("x.big", "big"));
        assert!(install.loose_path(&in_archive).is_err());
    }

    #[test]
    fn test_archive_path_rejects_escapes() {
        let install = GameInstallation::new("g", "/games/g");
        for path in ["../outside.big", "/tmp/outside.big", "data/../../outside.big", ""] {
            assert!(
                matches!(install.archive_path(&ArchiveLocation::new(path, "big")), Err(Error::InvalidPath(_))),
                "{path}"
            );
        }
    }
}
