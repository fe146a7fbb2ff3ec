//! The patch library: a directory of installed patch packages

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{PATCH_EXTENSION, PatchPackage, generate_id};
use crate::config::StoreSettings;
use crate::error::{Error, Result};
use crate::manifest::PatchManifest;
use crate::store::StoreLock;

/// Installed patches, stored as `<directory>/<id>.ap`
#[derive(Debug, Clone)]
pub struct PatchLibrary {
    root: PathBuf,
    settings: StoreSettings,
}

impl PatchLibrary {
    /// Open (and create if needed) a library directory
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open_with_settings(root, StoreSettings::default())
    }

    pub fn open_with_settings<P: AsRef<Path>>(root: P, settings: StoreSettings) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, settings })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the package for `id`
    #[must_use]
    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.{PATCH_EXTENSION}"))
    }

    /// Ids of all installed packages, sorted
    pub fn ids(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PATCH_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.path_for(id).is_file()
    }

    /// Manifests of all readable packages. Unreadable packages are skipped with a warning.
    pub fn list(&self) -> Result<Vec<PatchManifest>> {
        let mut manifests = Vec::new();
        for id in self.ids()? {
            match self.open_patch(id).and_then(|mut p| p.read_manifest()) {
                Ok(manifest) => manifests.push(manifest),
                Err(err) => tracing::warn!("Skipping unreadable patch {id}: {err}"),
            }
        }
        manifests.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(manifests)
    }

    /// Open an installed package read-only
    ///
    /// # Errors
    /// Returns [`Error::PatchNotFound`] if no package has this id.
    pub fn open_patch(&self, id: Uuid) -> Result<PatchPackage> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Err(Error::PatchNotFound(id));
        }
        PatchPackage::open(path)
    }

    /// Import a package file, replacing an installed package with the same id
    ///
    /// # Errors
    /// Returns an error if the source is not a valid package or the copy fails.
    pub fn import<P: AsRef<Path>>(&self, source: P) -> Result<PatchManifest> {
        let source = source.as_ref();
        let manifest = PatchPackage::open(source)?.read_manifest()?;
        let target = self.path_for(manifest.id);

        let _lock = StoreLock::acquire(&target)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".arcpatch-import-")
            .tempfile_in(&self.root)?;
        io::copy(&mut BufReader::new(File::open(source)?), &mut temp)?;
        temp.as_file().sync_all()?;

        let replaced = target.exists();
        temp.persist(&target)?;

        tracing::info!(
            "{} patch '{}' ({}) revision {}",
            if replaced { "Updated" } else { "Imported" },
            manifest.name,
            manifest.id,
            manifest.revision
        );
        Ok(manifest)
    }

    /// Import a package under a freshly generated id
    ///
    /// # Errors
    /// Returns an error if the source is not a valid package or the copy fails.
    pub fn import_as_copy<P: AsRef<Path>>(&self, source: P) -> Result<PatchManifest> {
        let mut source = PatchPackage::open(source)?;
        let mut manifest = source.read_manifest()?;
        manifest.id = generate_id(&self.ids()?);

        let mut copy = PatchPackage::open_for_writing(self.path_for(manifest.id), self.settings)?;
        let source_store = source.store_mut();
        for name in source_store.entry_names() {
            if name == super::MANIFEST_NAME {
                continue;
            }
            if let Some(mut stream) = source_store.open_stream(&name)? {
                copy.store_mut().write_stream(&name, &mut stream)?;
            }
        }
        copy.write_manifest(&manifest)?;
        copy.apply()?;

        tracing::info!("Imported patch '{}' as copy {}", manifest.name, manifest.id);
        Ok(manifest)
    }

    /// Delete an installed package
    ///
    /// # Errors
    /// Returns [`Error::PatchNotFound`] if no package has this id.
    pub fn remove(&self, id: Uuid) -> Result<()> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Err(Error::PatchNotFound(id));
        }
        let _lock = StoreLock::acquire(&path)?;
        std::fs::remove_file(&path)?;
        tracing::info!("Removed patch {id} from library");
        Ok(())
    }
}
