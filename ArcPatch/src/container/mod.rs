//! Patch containers (`.gpc` per installation, `.apc` per archive)
//!
//! A container is a resource store holding `manifest.json` (the
//! [`PatchContainerManifest`]) plus one namespace per patch id with that patch's
//! `resources/` and `assets/`. Original bytes of files the applied patches replaced or
//! removed live under the history id's namespace.

mod overlay;

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::StoreSettings;
use crate::error::{Error, Result};
use crate::manifest::{ModFilePath, PatchContainerManifest, PatchHistoryManifest, PatchManifest};
use crate::package::{MANIFEST_NAME, PatchPackage, normalize_resource_name};
use crate::store::{ResourceStore, StagedStore, StoreMode};

pub use overlay::{Overlay, OverlayBase, OverlayEntry, PatchStep};

/// Container suffix for a whole game installation
pub const INSTALLATION_CONTAINER_EXTENSION: &str = "gpc";
/// Container suffix for a single archive
pub const ARCHIVE_CONTAINER_EXTENSION: &str = "apc";

fn with_suffix(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Per-installation record of known and enabled patches and of what must be restored
#[derive(Debug)]
pub struct PatchContainer {
    store: ResourceStore,
    manifest: PatchContainerManifest,
}

impl PatchContainer {
    /// Container path for an installation root (`<root>.gpc`)
    #[must_use]
    pub fn path_for_installation(root: &Path) -> PathBuf {
        with_suffix(root, INSTALLATION_CONTAINER_EXTENSION)
    }

    /// Container path for a single archive (`<archive>.apc`)
    #[must_use]
    pub fn path_for_archive(archive: &Path) -> PathBuf {
        with_suffix(archive, ARCHIVE_CONTAINER_EXTENSION)
    }

    /// Open or create a container for modification. Holds the container's lock.
    ///
    /// # Errors
    /// Returns [`Error::ResourceLocked`] if another operation holds the container, or
    /// [`Error::UnsupportedFormatVersion`] if it was written by a newer version.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_settings(path, StoreSettings::default())
    }

    pub fn open_with_settings<P: AsRef<Path>>(path: P, settings: StoreSettings) -> Result<Self> {
        let store = ResourceStore::open_with_settings(path, StoreMode::ReadWrite, settings)?;
        Self::from_store(store)
    }

    /// Open an existing container for inspection
    ///
    /// # Errors
    /// Returns [`Error::ResourceNotFound`] if it does not exist.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = ResourceStore::open(path, StoreMode::ReadOnly)?;
        Self::from_store(store)
    }

    fn from_store(mut store: ResourceStore) -> Result<Self> {
        let manifest = Self::load_manifest(&mut store)?.unwrap_or_default();
        Ok(Self { store, manifest })
    }

    fn load_manifest(store: &mut ResourceStore) -> Result<Option<PatchContainerManifest>> {
        match store.read(MANIFEST_NAME)? {
            Some(data) => Ok(Some(PatchContainerManifest::from_json(&data)?)),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Manifest as committed in the store; `None` for a brand-new container
    pub fn read_manifest(&mut self) -> Result<Option<PatchContainerManifest>> {
        Self::load_manifest(&mut self.store)
    }

    /// Replace the in-memory manifest and queue it for the next [`apply`](Self::apply)
    pub fn write_manifest(
        &mut self,
        history: PatchHistoryManifest,
        patches: Vec<PatchManifest>,
        enabled: Option<Vec<Uuid>>,
    ) -> Result<()> {
        self.manifest.history = history;
        self.manifest.patches = patches;
        self.manifest.enabled_patches = enabled;
        self.queue_manifest()
    }

    fn queue_manifest(&mut self) -> Result<()> {
        self.store.write_json(MANIFEST_NAME, &self.manifest)
    }

    /// Current in-memory manifest
    #[must_use]
    pub fn manifest(&self) -> &PatchContainerManifest {
        &self.manifest
    }

    #[must_use]
    pub fn history(&self) -> &PatchHistoryManifest {
        &self.manifest.history
    }

    pub(crate) fn set_history(&mut self, history: PatchHistoryManifest) -> Result<()> {
        self.manifest.history = history;
        self.queue_manifest()
    }

    /// All known patches in list order
    #[must_use]
    pub fn patches(&self) -> &[PatchManifest] {
        &self.manifest.patches
    }

    #[must_use]
    pub fn patch(&self, id: Uuid) -> Option<&PatchManifest> {
        self.manifest.patches.iter().find(|p| p.id == id)
    }

    /// Enabled patches in application order
    #[must_use]
    pub fn enabled_patches(&self) -> Vec<&PatchManifest> {
        self.manifest
            .enabled_ids()
            .into_iter()
            .filter_map(|id| self.patch(id))
            .collect()
    }

    #[must_use]
    pub fn is_enabled(&self, id: Uuid) -> bool {
        self.manifest.enabled_ids().contains(&id)
    }

    /// Whether there are changes not yet committed
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.store.has_pending_changes()
    }

    fn patch_prefix(patch: Uuid) -> String {
        format!("{patch}/")
    }

    fn patch_resource_entry(patch: Uuid, name: &str) -> String {
        format!("{patch}/resources/{}", normalize_resource_name(name))
    }

    fn patch_asset_entry(patch: Uuid, name: &str) -> String {
        format!("{patch}/assets/{}", normalize_resource_name(name))
    }

    /// Stream a resource owned by `patch`
    ///
    /// # Errors
    /// Returns [`Error::PatchResourceNotFound`] if it does not exist.
    pub fn get_patch_resource(&mut self, patch: Uuid, name: &str) -> Result<Box<dyn Read + '_>> {
        self.store
            .open_stream(&Self::patch_resource_entry(patch, name))?
            .ok_or_else(|| Error::PatchResourceNotFound {
                patch,
                name: name.to_string(),
            })
    }

    /// Read a whole resource owned by `patch`
    ///
    /// # Errors
    /// Returns [`Error::PatchResourceNotFound`] if it does not exist.
    pub fn read_patch_resource(&mut self, patch: Uuid, name: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.get_patch_resource(patch, name)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Read an optional asset of `patch`
    pub fn get_patch_asset(&mut self, patch: Uuid, name: &str) -> Result<Option<Vec<u8>>> {
        self.store.read(&Self::patch_asset_entry(patch, name))
    }

    pub fn add_patch_resource(&mut self, patch: Uuid, name: &str, reader: &mut dyn Read) -> Result<u64> {
        self.store
            .write_stream(&Self::patch_resource_entry(patch, name), reader)
    }

    pub fn add_patch_asset(&mut self, patch: Uuid, name: &str, reader: &mut dyn Read) -> Result<u64> {
        self.store
            .write_stream(&Self::patch_asset_entry(patch, name), reader)
    }

    /// Queue removal of everything in `patch`'s namespace
    pub fn clear_patch_files(&mut self, patch: Uuid) -> Result<()> {
        let removed = self.store.delete_directory(&Self::patch_prefix(patch))?;
        tracing::debug!("Cleared {} entries of patch {}", removed, patch);
        Ok(())
    }

    fn backup_entry(&self, path: &ModFilePath) -> String {
        format!("{}/resources/{}", self.manifest.history.id, path.key())
    }

    pub(crate) fn write_backup(&mut self, path: &ModFilePath, data: &[u8]) -> Result<()> {
        let entry = self.backup_entry(path);
        self.store.write_bytes(&entry, data)
    }

    pub(crate) fn read_backup(&mut self, path: &ModFilePath) -> Result<Vec<u8>> {
        let entry = self.backup_entry(path);
        self.store
            .read(&entry)?
            .ok_or(Error::ResourceNotFound { name: entry })
    }

    /// Drop backups whose keys are not in `keep`
    pub(crate) fn prune_backups(&mut self, keep: &std::collections::HashSet<String>) -> Result<()> {
        let prefix = format!("{}/resources/", self.manifest.history.id);
        for key in self.store.entries_under(&prefix) {
            if !keep.contains(&key) {
                self.store.delete(&format!("{prefix}{key}"))?;
            }
        }
        Ok(())
    }

    /// Add a patch package to the container, or refresh it if its id is known.
    ///
    /// Copies the package's resources and assets into the patch's namespace. A
    /// refreshed patch keeps its list position; its old files are cleared first.
    /// `enable` enables the patch (appending it to the application order); otherwise
    /// a new patch starts disabled and a refreshed one keeps its state.
    ///
    /// # Errors
    /// Returns an error if the package cannot be read.
    pub fn add_patch(&mut self, package: &mut PatchPackage, enable: bool) -> Result<PatchManifest> {
        let manifest = package.read_manifest()?;
        let id = manifest.id;

        let position = self.manifest.patches.iter().position(|p| p.id == id);
        if position.is_some() {
            self.clear_patch_files(id)?;
        }

        for name in package.resource_names() {
            let mut stream = package.get_resource(&name)?;
            self.add_patch_resource(id, &name, &mut stream)?;
        }
        for name in package.asset_names() {
            if let Some(data) = package.get_asset(&name)? {
                self.add_patch_asset(id, &name, &mut data.as_slice())?;
            }
        }

        // Materialize "all enabled" before the patch list changes
        let mut enabled = self.manifest.enabled_ids();
        match position {
            Some(index) => self.manifest.patches[index] = manifest.clone(),
            None => self.manifest.patches.push(manifest.clone()),
        }
        if enable && !enabled.contains(&id) {
            enabled.push(id);
        }
        self.manifest.enabled_patches = Some(enabled);
        self.queue_manifest()?;

        tracing::info!(
            "{} patch '{}' ({}) in container {}",
            if position.is_some() { "Refreshed" } else { "Added" },
            manifest.name,
            id,
            self.path().display()
        );
        Ok(manifest)
    }

    /// Forget a patch and its files
    ///
    /// # Errors
    /// Returns [`Error::PatchNotFound`] if the container does not know it.
    pub fn remove_patch(&mut self, id: Uuid) -> Result<PatchManifest> {
        let index = self
            .manifest
            .patches
            .iter()
            .position(|p| p.id == id)
            .ok_or(Error::PatchNotFound(id))?;

        let enabled: Vec<Uuid> = self
            .manifest
            .enabled_ids()
            .into_iter()
            .filter(|other| *other != id)
            .collect();
        let removed = self.manifest.patches.remove(index);
        self.manifest.enabled_patches = Some(enabled);
        self.clear_patch_files(id)?;
        self.queue_manifest()?;
        Ok(removed)
    }

    /// Enable (appending to the application order) or disable a patch
    ///
    /// # Errors
    /// Returns [`Error::PatchNotFound`] if the container does not know it.
    pub fn set_enabled(&mut self, id: Uuid, enabled: bool) -> Result<()> {
        if self.patch(id).is_none() {
            return Err(Error::PatchNotFound(id));
        }
        let mut ids = self.manifest.enabled_ids();
        let present = ids.contains(&id);
        if enabled && !present {
            ids.push(id);
        } else if !enabled && present {
            ids.retain(|other| *other != id);
        }
        self.manifest.enabled_patches = Some(ids);
        self.queue_manifest()
    }

    /// Replace the enabled set and its application order
    ///
    /// # Errors
    /// Returns [`Error::PatchNotFound`] for an unknown id.
    pub fn set_enabled_order(&mut self, ids: &[Uuid]) -> Result<()> {
        let mut ordered: Vec<Uuid> = Vec::with_capacity(ids.len());
        for id in ids {
            if self.patch(*id).is_none() {
                return Err(Error::PatchNotFound(*id));
            }
            if !ordered.contains(id) {
                ordered.push(*id);
            }
        }
        self.manifest.enabled_patches = Some(ordered);
        self.queue_manifest()
    }

    /// Move an enabled patch to `position` in the application order
    ///
    /// # Errors
    /// Returns [`Error::PatchNotFound`] if the patch is not enabled.
    pub fn move_patch(&mut self, id: Uuid, position: usize) -> Result<()> {
        let mut ids = self.manifest.enabled_ids();
        let current = ids
            .iter()
            .position(|other| *other == id)
            .ok_or(Error::PatchNotFound(id))?;
        let moved = ids.remove(current);
        ids.insert(position.min(ids.len()), moved);
        self.manifest.enabled_patches = Some(ids);
        self.queue_manifest()
    }

    /// Write the complete new container next to the current one
    pub(crate) fn stage(&mut self) -> Result<StagedStore> {
        self.queue_manifest()?;
        self.store.stage()
    }

    pub(crate) fn commit(&mut self, staged: StagedStore) -> Result<()> {
        self.store.commit(staged)
    }

    /// Drop every uncommitted change and reload the committed manifest
    pub fn reload(&mut self) -> Result<()> {
        self.store.discard_pending();
        self.manifest = Self::load_manifest(&mut self.store)?.unwrap_or_default();
        Ok(())
    }

    /// Commit all queued changes atomically
    pub fn apply(&mut self) -> Result<()> {
        self.queue_manifest()?;
        self.store.apply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn package(dir: &Path, name: &str, file: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(format!("{name}.ap"));
        let mut manifest = PatchManifest::new(name);
        manifest.added_files.push(ModFilePath::loose(file));
        let mut package = PatchPackage::open_for_writing(&path, StoreSettings::default()).unwrap();
        package.write_manifest(&manifest).unwrap();
        package
            .add_resource(&ModFilePath::loose(file).resource_name(), &mut &data[..])
            .unwrap();
        package.add_asset("thumbnail.png", &mut &b"png"[..]).unwrap();
        package.apply().unwrap();
        path
    }

    #[test]
    fn test_container_paths() {
        assert_eq!(
            PatchContainer::path_for_installation(Path::new("/games/rayman2")),
            PathBuf::from("/games/rayman2.gpc")
        );
        assert_eq!(
            PatchContainer::path_for_archive(Path::new("/games/r2/data.cnt")),
            PathBuf::from("/games/r2/data.cnt.apc")
        );
    }

    #[test]
    fn test_new_container_has_no_manifest() {
        let temp = TempDir::new().unwrap();
        let mut container = PatchContainer::open(temp.path().join("game.gpc")).unwrap();
        assert!(container.read_manifest().unwrap().is_none());
        assert!(container.patches().is_empty());
        assert!(container.history().is_empty());
    }

    #[test]
    fn test_patch_namespaces() {
        let temp = TempDir::new().unwrap();
        let a = package(temp.path(), "a", "foo/bar.dat", b"from a");
        let b = package(temp.path(), "b", "foo/bar.dat", b"from b");
        let path = temp.path().join("game.gpc");

        let mut container = PatchContainer::open(&path).unwrap();
        let a = container.add_patch(&mut PatchPackage::open(&a).unwrap(), true).unwrap();
        let b = container.add_patch(&mut PatchPackage::open(&b).unwrap(), false).unwrap();
        assert!(container.has_changes());
        container.apply().unwrap();
        drop(container);

        let mut container = PatchContainer::open(&path).unwrap();
        assert_eq!(container.read_patch_resource(a.id, "files/foo/bar.dat").unwrap(), b"from a");
        assert_eq!(container.read_patch_resource(b.id, "files/foo/bar.dat").unwrap(), b"from b");
        assert_eq!(container.get_patch_asset(a.id, "thumbnail.png").unwrap().as_deref(), Some(&b"png"[..]));
        assert!(matches!(
            container.read_patch_resource(a.id, "missing"),
            Err(Error::PatchResourceNotFound { .. })
        ));
        assert_eq!(container.enabled_patches().len(), 1);

        container.remove_patch(a.id).unwrap();
        assert!(matches!(
            container.read_patch_resource(a.id, "files/foo/bar.dat"),
            Err(Error::PatchResourceNotFound { .. })
        ));
        assert_eq!(container.patches().len(), 1);
        assert!(container.enabled_patches().is_empty());
    }

    #[test]
    fn test_enable_order() {
        let temp = TempDir::new().unwrap();
        let a = package(temp.path(), "a", "x", b"a");
        let b = package(temp.path(), "b", "x", b"b");
        let c = package(temp.path(), "c", "x", b"c");

        let mut container = PatchContainer::open(temp.path().join("game.gpc")).unwrap();
        let a = container.add_patch(&mut PatchPackage::open(&a).unwrap(), true).unwrap().id;
        let b = container.add_patch(&mut PatchPackage::open(&b).unwrap(), true).unwrap().id;
        let c = container.add_patch(&mut PatchPackage::open(&c).unwrap(), true).unwrap().id;

        container.move_patch(c, 0).unwrap();
        let order: Vec<Uuid> = container.enabled_patches().iter().map(|p| p.id).collect();
        assert_eq!(order, vec![c, a, b]);

        container.set_enabled(a, false).unwrap();
        container.set_enabled_order(&[b, c]).unwrap();
        let order: Vec<Uuid> = container.enabled_patches().iter().map(|p| p.id).collect();
        assert_eq!(order, vec![b, c]);
        assert!(matches!(container.set_enabled_order(&[Uuid::new_v4()]), Err(Error::PatchNotFound(_))));
    }

    #[test]
    fn test_reload_discards_uncommitted() {
        let temp = TempDir::new().unwrap();
        let a = package(temp.path(), "a", "x", b"a");
        let mut container = PatchContainer::open(temp.path().join("game.gpc")).unwrap();
        container.add_patch(&mut PatchPackage::open(&a).unwrap(), true).unwrap();
        container.reload().unwrap();
        assert!(container.patches().is_empty());
        assert!(!container.has_changes());
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("game.gpc");
        let _first = PatchContainer::open(&path).unwrap();
        assert!(matches!(PatchContainer::open(&path), Err(Error::ResourceLocked { .. })));
    }
}
