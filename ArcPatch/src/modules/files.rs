//! Files module: verbatim added files and a removed-files list
//!
//! ```text
//! files/
//!   added/<game path>      files to add or replace
//!   removed.txt            one game path per line, '#' starts a comment
//! ```

use std::path::Path;

use walkdir::WalkDir;

use super::{ByteSource, ModFile, ModModule, ModuleContext};
use crate::error::{Error, Result};
use crate::manifest::ModFilePath;
use crate::utils::relative_path;

const ADDED_DIR: &str = "added";
const REMOVED_LIST: &str = "removed.txt";

const REMOVED_TEMPLATE: &str = "\
# Files to remove from the game, one path per line.
# Paths starting with an archive's path are removed from inside that archive.
";

/// Adds files verbatim and removes listed files
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesModule;

impl ModModule for FilesModule {
    fn id(&self) -> &'static str {
        "files"
    }

    fn description(&self) -> &'static str {
        "Add, replace and remove whole files"
    }

    fn setup_module_folder(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path.join(ADDED_DIR))?;
        let removed = path.join(REMOVED_LIST);
        if !removed.exists() {
            std::fs::write(removed, REMOVED_TEMPLATE)?;
        }
        Ok(())
    }

    fn added_files(&self, ctx: &ModuleContext<'_>, path: &Path) -> Result<Vec<ModFile>> {
        let root = path.join(ADDED_DIR);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || entry.file_name() == ".DS_Store" {
                continue;
            }
            let relative = relative_path(entry.path(), root.as_path())
                .ok_or_else(|| Error::InvalidPath(entry.path().display().to_string()))?;
            files.push(ModFile {
                path: ctx.resolve(&relative),
                source: ByteSource::File(entry.path().to_path_buf()),
            });
        }
        Ok(files)
    }

    fn removed_files(&self, ctx: &ModuleContext<'_>, path: &Path) -> Result<Vec<ModFilePath>> {
        let list = path.join(REMOVED_LIST);
        if !list.is_file() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(list)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| ctx.resolve(line))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ArchiveLocation, PatchManifest};
    use tempfile::TempDir;

    #[test]
    fn test_collects_added_and_removed() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("files");
        FilesModule.setup_module_folder(&folder).unwrap();

        std::fs::create_dir_all(folder.join("added/data.big/data")).unwrap();
        std::fs::write(folder.join("added/data.big/data/level1.bin"), b"0123456789").unwrap();
        std::fs::write(folder.join("added/readme.txt"), b"hello").unwrap();
        std::fs::write(folder.join("added/.DS_Store"), b"junk").unwrap();
        std::fs::write(
            folder.join("removed.txt"),
            "# comment\n\ndata.big/data/level9.bin\n  \n",
        )
        .unwrap();

        let archives = vec![ArchiveLocation::new("data.big", "big")];
        let manifest = PatchManifest::new("p");
        let ctx = ModuleContext::new(&manifest, &archives);

        let added = FilesModule.added_files(&ctx, &folder).unwrap();
        let keys: Vec<String> = added.iter().map(|f| f.path.key()).collect();
        assert_eq!(
            keys,
            vec!["archives/data.big/data/level1.bin", "files/readme.txt"]
        );

        let removed = FilesModule.removed_files(&ctx, &folder).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].file_path, "data/level9.bin");
    }

    #[test]
    fn test_missing_folder_is_empty() {
        let temp = TempDir::new().unwrap();
        let manifest = PatchManifest::new("p");
        let ctx = ModuleContext::new(&manifest, &[]);
        assert!(FilesModule.added_files(&ctx, temp.path()).unwrap().is_empty());
        assert!(FilesModule.removed_files(&ctx, temp.path()).unwrap().is_empty());
    }
}
